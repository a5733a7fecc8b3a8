//! Hierarchical names for everything the simulator owns. The textual form
//! is dot-separated, leaf first: `block.3_1.0_0.array0` names a data block
//! on core (3,1) of chip (0,0) of chip array `array0`.

use crate::{SimError, SimResult, CORES_PER_CHIP_X, CORES_PER_CHIP_Y};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdKind {
    ChipArray,
    Chip,
    Core,
    Resource,
    DataBlock,
    Fpga,
    Invalid,
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id {
    kind: IdKind,
    text: String,
}

impl Id {
    pub fn invalid() -> Self {
        Id {
            kind: IdKind::Invalid,
            text: String::new(),
        }
    }

    /// The sentinel destination for packets leaving the simulated fabric.
    pub fn fpga() -> Self {
        Id {
            kind: IdKind::Fpga,
            text: "FPGA".to_string(),
        }
    }

    pub fn chip_array(name: &str) -> Self {
        Id {
            kind: IdKind::ChipArray,
            text: name.to_string(),
        }
    }

    pub fn chip(chip_array: &Id, x: u32, y: u32) -> Self {
        assert_eq!(chip_array.kind, IdKind::ChipArray);
        Id {
            kind: IdKind::Chip,
            text: format!("{}_{}.{}", x, y, chip_array.text),
        }
    }

    pub fn core(chip: &Id, x: u32, y: u32) -> Self {
        assert_eq!(chip.kind, IdKind::Chip);
        Id {
            kind: IdKind::Core,
            text: format!("{}_{}.{}", x, y, chip.text),
        }
    }

    pub fn resource(core: &Id, name: &str) -> Self {
        assert_eq!(core.kind, IdKind::Core);
        Id {
            kind: IdKind::Resource,
            text: format!("{}.{}", name, core.text),
        }
    }

    pub fn data_block(core: &Id, name: &str) -> Self {
        assert_eq!(core.kind, IdKind::Core);
        Id {
            kind: IdKind::DataBlock,
            text: format!("{}.{}", name, core.text),
        }
    }

    /// Inverse of `Display`. The segment count selects the kind; four
    /// segments always parse as a data block (resources share that
    /// namespace).
    pub fn parse(s: &str) -> SimResult<Self> {
        if s == "FPGA" {
            return Ok(Id::fpga());
        }
        let segments: Vec<&str> = s.split('.').collect();
        let parse_xy = |seg: &str| -> SimResult<(u32, u32)> {
            seg.split_once('_')
                .and_then(|(a, b)| Some((a.parse().ok()?, b.parse().ok()?)))
                .ok_or_else(|| SimError::Parse(format!("bad coordinate segment '{seg}' in '{s}'")))
        };
        match segments.len() {
            1 if !segments[0].is_empty() => Ok(Id::chip_array(segments[0])),
            2 => {
                let (x, y) = parse_xy(segments[0])?;
                Ok(Id::chip(&Id::chip_array(segments[1]), x, y))
            }
            3 => {
                let (cx, cy) = parse_xy(segments[1])?;
                let (x, y) = parse_xy(segments[0])?;
                Ok(Id::core(&Id::chip(&Id::chip_array(segments[2]), cx, cy), x, y))
            }
            4 => {
                let (cx, cy) = parse_xy(segments[2])?;
                let (x, y) = parse_xy(segments[1])?;
                let core = Id::core(&Id::chip(&Id::chip_array(segments[3]), cx, cy), x, y);
                Ok(Id::data_block(&core, segments[0]))
            }
            _ => Err(SimError::Parse(format!("unrecognised identity '{s}'"))),
        }
    }

    pub fn kind(&self) -> IdKind {
        self.kind
    }

    pub fn valid(&self) -> bool {
        self.kind != IdKind::Invalid
    }

    pub fn is_chip_array(&self) -> bool {
        self.kind == IdKind::ChipArray
    }

    pub fn is_chip(&self) -> bool {
        self.kind == IdKind::Chip
    }

    pub fn is_core(&self) -> bool {
        self.kind == IdKind::Core
    }

    pub fn is_fpga(&self) -> bool {
        self.kind == IdKind::Fpga
    }

    /// Packet-header blocks are recognised by their name prefix; the NoC
    /// pack stage keys on this.
    pub fn is_packet_header(&self) -> bool {
        self.module_str().starts_with("packet_")
    }

    /// The leading (leaf) segment of the name.
    pub fn module_str(&self) -> &str {
        self.text.split('.').next().unwrap_or("")
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    fn ancestor(&self, kind: IdKind, strip: usize) -> Id {
        let mut text = self.text.as_str();
        for _ in 0..strip {
            match text.split_once('.') {
                Some((_, rest)) => text = rest,
                None => return Id::invalid(),
            }
        }
        Id {
            kind,
            text: text.to_string(),
        }
    }

    /// The chip array this identity lives on, or an invalid identity when
    /// it has none.
    pub fn chip_array_id(&self) -> Id {
        match self.kind {
            IdKind::ChipArray => self.clone(),
            IdKind::Chip => self.ancestor(IdKind::ChipArray, 1),
            IdKind::Core => self.ancestor(IdKind::ChipArray, 2),
            IdKind::Resource | IdKind::DataBlock => self.ancestor(IdKind::ChipArray, 3),
            _ => Id::invalid(),
        }
    }

    pub fn chip_id(&self) -> Id {
        match self.kind {
            IdKind::Chip => self.clone(),
            IdKind::Core => self.ancestor(IdKind::Chip, 1),
            IdKind::Resource | IdKind::DataBlock => self.ancestor(IdKind::Chip, 2),
            _ => Id::invalid(),
        }
    }

    pub fn core_id(&self) -> Id {
        match self.kind {
            IdKind::Core => self.clone(),
            IdKind::Resource | IdKind::DataBlock => self.ancestor(IdKind::Core, 1),
            _ => Id::invalid(),
        }
    }

    /// Core coordinates within the chip. Only meaningful on core-bearing
    /// identities.
    pub fn core_xy(&self) -> (u32, u32) {
        let core = self.core_id();
        assert!(core.valid(), "core_xy on {:?} identity", self.kind);
        parse_xy_segment(core.module_str())
    }

    pub fn chip_xy(&self) -> (u32, u32) {
        let chip = self.chip_id();
        assert!(chip.valid(), "chip_xy on {:?} identity", self.kind);
        parse_xy_segment(chip.module_str())
    }
}

fn parse_xy_segment(seg: &str) -> (u32, u32) {
    let (x, y) = seg.split_once('_').expect("malformed coordinate segment");
    (
        x.parse().expect("malformed x coordinate"),
        y.parse().expect("malformed y coordinate"),
    )
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.text)
    }
}

/// Core identity at `(dx, dy)` from `core_id`, carrying across chip
/// boundaries. A negative resulting chip coordinate leaves the fabric and
/// resolves to the FPGA identity.
pub fn offset_core(core_id: &Id, dx: i32, dy: i32) -> Id {
    assert!(core_id.is_core());

    let (core_x, core_y) = core_id.core_xy();
    let (chip_x, chip_y) = core_id.chip_xy();
    let array = core_id.chip_array_id();

    let mut chip_dx = dx / CORES_PER_CHIP_X;
    let mut chip_dy = dy / CORES_PER_CHIP_Y;

    let mut new_core_x = core_x as i32 + dx % CORES_PER_CHIP_X;
    let mut new_core_y = core_y as i32 + dy % CORES_PER_CHIP_Y;

    if new_core_x >= CORES_PER_CHIP_X {
        new_core_x -= CORES_PER_CHIP_X;
        chip_dx += 1;
    } else if new_core_x < 0 {
        new_core_x += CORES_PER_CHIP_X;
        chip_dx -= 1;
    }

    if new_core_y >= CORES_PER_CHIP_Y {
        new_core_y -= CORES_PER_CHIP_Y;
        chip_dy += 1;
    } else if new_core_y < 0 {
        new_core_y += CORES_PER_CHIP_Y;
        chip_dy -= 1;
    }

    let new_chip_x = chip_x as i32 + chip_dx;
    let new_chip_y = chip_y as i32 + chip_dy;

    if new_chip_x < 0 || new_chip_y < 0 {
        return Id::fpga();
    }

    Id::core(
        &Id::chip(&array, new_chip_x as u32, new_chip_y as u32),
        new_core_x as u32,
        new_core_y as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core00() -> Id {
        Id::core(&Id::chip(&Id::chip_array("array0"), 0, 0), 0, 0)
    }

    #[test]
    fn display_is_leaf_first() {
        let core = Id::core(&Id::chip(&Id::chip_array("a"), 1, 2), 3, 4);
        assert_eq!(core.to_string(), "3_4.1_2.a");
        let block = Id::data_block(&core, "weights");
        assert_eq!(block.to_string(), "weights.3_4.1_2.a");
    }

    #[test]
    fn parse_round_trips_every_kind() {
        let array = Id::chip_array("fabric");
        let chip = Id::chip(&array, 0, 1);
        let core = Id::core(&chip, 15, 9);
        let block = Id::data_block(&core, "din");
        for id in [array, chip, core, block, Id::fpga()] {
            assert_eq!(Id::parse(&id.to_string()).unwrap(), id);
        }
    }

    #[test]
    fn ancestors_return_original_builders() {
        let array = Id::chip_array("fabric");
        let chip = Id::chip(&array, 2, 3);
        let core = Id::core(&chip, 4, 5);
        let block = Id::data_block(&core, "b");

        assert_eq!(block.core_id(), core);
        assert_eq!(block.chip_id(), chip);
        assert_eq!(block.chip_array_id(), array);
        assert_eq!(core.chip_id(), chip);
        assert_eq!(core.chip_array_id(), array);
        assert_eq!(chip.chip_array_id(), array);
        assert_eq!(core.core_xy(), (4, 5));
        assert_eq!(core.chip_xy(), (2, 3));
    }

    #[test]
    fn offset_stays_within_chip() {
        let id = offset_core(&core00(), 3, 2);
        assert_eq!(id.core_xy(), (3, 2));
        assert_eq!(id.chip_xy(), (0, 0));
    }

    #[test]
    fn offset_wraps_across_chips() {
        let id = offset_core(&core00(), 16, 10);
        assert_eq!(id.core_xy(), (0, 0));
        assert_eq!(id.chip_xy(), (1, 1));

        let id = offset_core(&core00(), 17, 0);
        assert_eq!(id.core_xy(), (1, 0));
        assert_eq!(id.chip_xy(), (1, 0));
    }

    #[test]
    fn offset_preserves_flat_coordinates() {
        let start = Id::core(&Id::chip(&Id::chip_array("a"), 1, 1), 7, 3);
        for (dx, dy) in [(5, 4), (12, 9), (31, 0), (-7, -3), (16, 10)] {
            let id = offset_core(&start, dx, dy);
            let (cx, cy) = id.core_xy();
            let (hx, hy) = id.chip_xy();
            assert_eq!(
                hx as i32 * CORES_PER_CHIP_X + cx as i32,
                CORES_PER_CHIP_X + 7 + dx
            );
            assert_eq!(
                hy as i32 * CORES_PER_CHIP_Y + cy as i32,
                CORES_PER_CHIP_Y + 3 + dy
            );
        }
    }

    #[test]
    fn offset_off_fabric_is_fpga() {
        assert!(offset_core(&core00(), -1, 0).is_fpga());
        assert!(offset_core(&core00(), 0, -1).is_fpga());
        let edge = Id::core(&Id::chip(&Id::chip_array("a"), 0, 0), 0, 9);
        assert!(!offset_core(&edge, 0, -9).is_fpga());
        assert!(offset_core(&edge, 0, -10).is_fpga());
    }

    #[test]
    fn packet_header_names_are_recognised() {
        let core = core00();
        assert!(Id::data_block(&core, "packet_header_0").is_packet_header());
        assert!(!Id::data_block(&core, "din").is_packet_header());
    }
}
