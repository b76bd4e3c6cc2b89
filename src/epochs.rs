use crate::Epoch;

/// Index and level of the epoch containing `point`, if any.
pub fn annotate(epochs: &[Epoch], point: usize) -> Option<(usize, f64)> {
    epochs
        .iter()
        .enumerate()
        .find(|(_, epoch)| epoch.contains(point))
        .map(|(index, epoch)| (index, epoch.level))
}
