use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Marker stored in a site's cell slot when the site is not a member of that cell index.
pub const NO_CELL: usize = usize::MAX;

/// An interaction center belonging to exactly one particle.
///
/// Sites are created together with their particle and are only ever mutated through the
/// [`Configuration`](super::configuration::Configuration), which the engine drives on behalf of
/// the attempting trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// Index into the configuration's site-type table.
    pub type_id: usize,
    /// Position in the (possibly unwrapped) frame of its particle.
    pub position: Point3<f64>,
    /// Euler angles, present only for anisotropic site types.
    pub orientation: Option<Vector3<f64>>,
    /// Whether the site currently contributes to energies.
    ///
    /// Trials clear this flag on mobile sites while stages are grown one at a time and
    /// restore it once the attempt has been resolved.
    pub physical: bool,
    /// One cell id per cell index registered with the engine, or [`NO_CELL`].
    pub cells: Vec<usize>,
}

impl Site {
    /// Creates a physical site that is not yet assigned to any cell.
    ///
    /// # Arguments
    ///
    /// * `type_id` - The site type index.
    /// * `position` - The initial position.
    pub fn new(type_id: usize, position: Point3<f64>) -> Self {
        Self {
            type_id,
            position,
            orientation: None,
            physical: true,
            cells: Vec::new(),
        }
    }

    /// Returns the cell this site occupies in the given cell index slot, if any.
    pub fn cell(&self, slot: usize) -> Option<usize> {
        self.cells.get(slot).copied().filter(|&c| c != NO_CELL)
    }

    pub(crate) fn set_cell(&mut self, slot: usize, cell: usize) {
        if self.cells.len() <= slot {
            self.cells.resize(slot + 1, NO_CELL);
        }
        self.cells[slot] = cell;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_site_is_physical_and_unassigned() {
        let site = Site::new(2, Point3::new(1.0, 2.0, 3.0));
        assert!(site.physical);
        assert_eq!(site.type_id, 2);
        assert_eq!(site.cell(0), None);
    }

    #[test]
    fn set_cell_grows_slots_with_placeholders() {
        let mut site = Site::new(0, Point3::origin());
        site.set_cell(2, 7);
        assert_eq!(site.cells, vec![NO_CELL, NO_CELL, 7]);
        assert_eq!(site.cell(1), None);
        assert_eq!(site.cell(2), Some(7));
    }
}
