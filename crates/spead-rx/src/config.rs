use crate::error::RingError;

/// Cells are rounded up to a multiple of this so that cache-line-aligned
/// payload regions never straddle a boundary.
const CACHELINE: usize = 64;

/// Upper bounds are generous but finite; they exist to catch
/// misconfiguration (a caller passing bytes instead of kilobytes) rather
/// than to express any real hardware limit.
const MAX_CELL_SIZE: usize = 1 << 20;
const MAX_CELLS: usize = 1 << 20;

/// Fixed parameters of a `CellRing`: `cell_size` (rounded up to a
/// cacheline multiple) and `nof_cells` (rounded up to the next power of
/// two so masking replaces modulo).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRingConfig {
    pub cell_size: usize,
    pub nof_cells: usize,
}

impl CellRingConfig {
    /// A reasonable mid-size ring: 2 KiB cells, 1024 of them.
    pub const DEFAULT: Self = Self::new(2048, 1024);

    /// Sized for 9000-byte SPEAD payloads, matching the default
    /// deployment's frame size.
    pub const JUMBO: Self = Self::new(9000, 4096);

    /// Builds a validated config, panicking on out-of-range input.
    ///
    /// Use [`CellRingConfig::try_new`] when the values come from an
    /// untrusted source (JSON over the control API) where a panic is not
    /// acceptable.
    #[must_use]
    pub const fn new(cell_size: usize, nof_cells: usize) -> Self {
        assert!(cell_size > 0 && cell_size <= MAX_CELL_SIZE, "cell_size out of range");
        assert!(nof_cells > 0 && nof_cells <= MAX_CELLS, "nof_cells out of range");
        Self {
            cell_size: round_up(cell_size, CACHELINE),
            nof_cells: next_power_of_two(nof_cells),
        }
    }

    /// Fallible counterpart of [`CellRingConfig::new`] for values that
    /// cross the control-API boundary and must never panic.
    pub fn try_new(cell_size: usize, nof_cells: usize) -> Result<Self, RingError> {
        if cell_size == 0 || cell_size > MAX_CELL_SIZE {
            return Err(RingError::InvalidCellSize {
                got: cell_size,
                max: MAX_CELL_SIZE,
            });
        }
        if nof_cells == 0 || nof_cells > MAX_CELLS {
            return Err(RingError::InvalidCellCount {
                got: nof_cells,
                max: MAX_CELLS,
            });
        }
        Ok(Self {
            cell_size: round_up(cell_size, CACHELINE),
            nof_cells: next_power_of_two(nof_cells),
        })
    }

    #[must_use]
    pub const fn total_bytes(&self) -> usize {
        self.cell_size * self.nof_cells
    }
}

impl Default for CellRingConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const fn round_up(value: usize, multiple: usize) -> usize {
    (value + multiple - 1) / multiple * multiple
}

const fn next_power_of_two(value: usize) -> usize {
    if value <= 1 {
        return 1;
    }
    let mut p = 1usize;
    while p < value {
        p <<= 1;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_cell_size_up_to_cacheline() {
        let cfg = CellRingConfig::new(100, 4);
        assert_eq!(cfg.cell_size, 128);
    }

    #[test]
    fn rounds_cell_count_up_to_power_of_two() {
        let cfg = CellRingConfig::new(64, 100);
        assert_eq!(cfg.nof_cells, 128);
    }

    #[test]
    fn power_of_two_cell_count_is_unchanged() {
        let cfg = CellRingConfig::new(64, 256);
        assert_eq!(cfg.nof_cells, 256);
    }

    #[test]
    fn try_new_rejects_zero() {
        assert!(CellRingConfig::try_new(0, 16).is_err());
        assert!(CellRingConfig::try_new(64, 0).is_err());
    }

    #[test]
    fn try_new_rejects_oversized_input_without_panicking() {
        assert!(CellRingConfig::try_new(MAX_CELL_SIZE + 1, 16).is_err());
        assert!(CellRingConfig::try_new(64, MAX_CELLS + 1).is_err());
    }

    #[test]
    fn presets_are_already_normalised() {
        assert_eq!(CellRingConfig::DEFAULT.nof_cells, 1024);
        assert_eq!(CellRingConfig::JUMBO.cell_size % CACHELINE, 0);
    }
}
