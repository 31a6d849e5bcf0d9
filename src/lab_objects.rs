//! The lab bench: every vessel on the table, plus the spectrophotometer
//! state. Geometry and styling live entirely in the presentation layer; the
//! bench tracks identity, capacity, contents and the handful of flags the
//! step engine validates against.

use crate::optics::{STOCK_CONCENTRATION, TARGET_WAVELENGTH, UNKNOWN_CONCENTRATION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type ObjectId = String;

pub const PIPETTE_ID: &str = "pipette";
pub const CUVETTE_ID: &str = "cuvette";
pub const SPEC_ID: &str = "spec20";
pub const WASTE_ID: &str = "wasteBeaker";
pub const STOCK_BOTTLE_ID: &str = "stockBottle";
pub const WATER_BOTTLE_ID: &str = "waterBottle";
pub const UNKNOWN_BOTTLE_ID: &str = "unknownBottle";

pub const TUBE_IDS: [&str; 6] = [
    "tube_10_0", "tube_8_2", "tube_6_4", "tube_4_6", "tube_2_8", "tube_0_10",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VesselKind {
    Bottle,
    TestTube,
    WasteBeaker,
}

/// A plain liquid container: bottles, test tubes and the waste beaker.
///
/// `concentration` is `None` for a container that has never held a labeled
/// liquid (the waste beaker starts that way); the sentinel
/// [`UNKNOWN_CONCENTRATION`] marks an unlabeled solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vessel {
    pub id: ObjectId,
    pub label: String,
    pub kind: VesselKind,
    pub max_volume: f64,
    pub current_volume: f64,
    pub concentration: Option<f64>,
}

/// The transfer pipette. Its charge keeps the concentration it was drawn
/// at, independent of whatever it later touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipette {
    pub id: ObjectId,
    pub label: String,
    pub max_volume: f64,
    pub current_volume: f64,
    pub contents_concentration: f64,
}

/// The measurement cuvette. `is_clean` and `concentration == 0` are
/// deliberately independent: a cuvette full of blank is nominally at zero
/// concentration but still becomes dirty once drained after use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cuvette {
    pub id: ObjectId,
    pub label: String,
    pub max_volume: f64,
    pub current_volume: f64,
    pub concentration: f64,
    pub is_clean: bool,
    pub is_in_spec: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LabObject {
    Vessel(Vessel),
    Pipette(Pipette),
    Cuvette(Cuvette),
}

impl LabObject {
    pub fn label(&self) -> &str {
        match self {
            LabObject::Vessel(v) => &v.label,
            LabObject::Pipette(p) => &p.label,
            LabObject::Cuvette(c) => &c.label,
        }
    }

    pub fn current_volume(&self) -> f64 {
        match self {
            LabObject::Vessel(v) => v.current_volume,
            LabObject::Pipette(p) => p.current_volume,
            LabObject::Cuvette(c) => c.current_volume,
        }
    }

    pub fn max_volume(&self) -> f64 {
        match self {
            LabObject::Vessel(v) => v.max_volume,
            LabObject::Pipette(p) => p.max_volume,
            LabObject::Cuvette(c) => c.max_volume,
        }
    }

    /// Concentration of what would pour out of this object.
    pub fn transfer_concentration(&self) -> Option<f64> {
        match self {
            LabObject::Vessel(v) => v.concentration,
            LabObject::Pipette(p) => Some(p.contents_concentration),
            LabObject::Cuvette(c) => Some(c.concentration),
        }
    }

    pub fn set_current_volume(&mut self, volume: f64) {
        match self {
            LabObject::Vessel(v) => v.current_volume = volume,
            LabObject::Pipette(p) => p.current_volume = volume,
            LabObject::Cuvette(c) => c.current_volume = volume,
        }
    }

    pub fn set_concentration(&mut self, concentration: f64) {
        match self {
            LabObject::Vessel(v) => v.concentration = Some(concentration),
            LabObject::Pipette(p) => p.contents_concentration = concentration,
            LabObject::Cuvette(c) => c.concentration = concentration,
        }
    }

    pub fn is_cuvette(&self) -> bool {
        matches!(self, LabObject::Cuvette(_))
    }
}

/// Display/occupancy state of the spectrophotometer. The instrument itself
/// holds no liquid; it only references the cuvette currently loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentState {
    pub id: ObjectId,
    pub cuvette_inside_id: Option<ObjectId>,
    pub reading: String,
    pub wavelength: u32,
    pub is_zeroed: bool,
    pub absorbance_mode: bool,
}

impl Default for InstrumentState {
    fn default() -> Self {
        InstrumentState {
            id: SPEC_ID.to_string(),
            cuvette_inside_id: None,
            reading: "-- %T".to_string(),
            wavelength: TARGET_WAVELENGTH,
            is_zeroed: false,
            absorbance_mode: false,
        }
    }
}

/// Everything on the bench, keyed by object id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabBench {
    pub objects: BTreeMap<ObjectId, LabObject>,
}

impl LabBench {
    pub fn object(&self, id: &str) -> Option<&LabObject> {
        self.objects.get(id)
    }

    pub fn object_mut(&mut self, id: &str) -> Option<&mut LabObject> {
        self.objects.get_mut(id)
    }

    pub fn pipette(&self, id: &str) -> Option<&Pipette> {
        match self.objects.get(id) {
            Some(LabObject::Pipette(p)) => Some(p),
            _ => None,
        }
    }

    pub fn pipette_mut(&mut self, id: &str) -> Option<&mut Pipette> {
        match self.objects.get_mut(id) {
            Some(LabObject::Pipette(p)) => Some(p),
            _ => None,
        }
    }

    pub fn cuvette(&self, id: &str) -> Option<&Cuvette> {
        match self.objects.get(id) {
            Some(LabObject::Cuvette(c)) => Some(c),
            _ => None,
        }
    }

    pub fn cuvette_mut(&mut self, id: &str) -> Option<&mut Cuvette> {
        match self.objects.get_mut(id) {
            Some(LabObject::Cuvette(c)) => Some(c),
            _ => None,
        }
    }

    /// Total liquid across every container, for conservation checks.
    pub fn total_liquid_volume(&self) -> f64 {
        self.objects.values().map(LabObject::current_volume).sum()
    }
}

fn bottle(id: &str, label: &str, concentration: f64, max_volume: f64) -> Vessel {
    Vessel {
        id: id.to_string(),
        label: label.to_string(),
        kind: VesselKind::Bottle,
        max_volume,
        current_volume: max_volume,
        concentration: Some(concentration),
    }
}

fn test_tube(id: &str, label: &str) -> Vessel {
    Vessel {
        id: id.to_string(),
        label: label.to_string(),
        kind: VesselKind::TestTube,
        max_volume: 10.0,
        current_volume: 0.0,
        concentration: Some(0.0),
    }
}

/// The fixed starting bench for the guided experiment.
pub fn starting_bench() -> LabBench {
    let mut objects = BTreeMap::new();

    let bottles = [
        bottle(STOCK_BOTTLE_ID, "Stock Blue#1", STOCK_CONCENTRATION, 1000.0),
        bottle(WATER_BOTTLE_ID, "Distilled H₂O", 0.0, 1000.0),
        bottle(UNKNOWN_BOTTLE_ID, "Unknown Drink", UNKNOWN_CONCENTRATION, 500.0),
    ];
    for vessel in bottles {
        objects.insert(vessel.id.clone(), LabObject::Vessel(vessel));
    }

    let tube_labels = ["10/0", "8/2", "6/4", "4/6", "2/8", "0/10 (Blank)"];
    for (id, label) in TUBE_IDS.iter().zip(tube_labels) {
        let tube = test_tube(id, label);
        objects.insert(tube.id.clone(), LabObject::Vessel(tube));
    }

    objects.insert(
        WASTE_ID.to_string(),
        LabObject::Vessel(Vessel {
            id: WASTE_ID.to_string(),
            label: "Waste".to_string(),
            kind: VesselKind::WasteBeaker,
            max_volume: 250.0,
            current_volume: 0.0,
            concentration: None,
        }),
    );

    objects.insert(
        PIPETTE_ID.to_string(),
        LabObject::Pipette(Pipette {
            id: PIPETTE_ID.to_string(),
            label: "Pipette".to_string(),
            max_volume: 10.0,
            current_volume: 0.0,
            contents_concentration: 0.0,
        }),
    );

    objects.insert(
        CUVETTE_ID.to_string(),
        LabObject::Cuvette(Cuvette {
            id: CUVETTE_ID.to_string(),
            label: "Cuvette".to_string(),
            max_volume: 4.0,
            current_volume: 0.0,
            concentration: 0.0,
            is_clean: true,
            is_in_spec: false,
        }),
    );

    LabBench { objects }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starting_bench_layout() {
        let bench = starting_bench();
        assert_eq!(bench.objects.len(), 11);

        let stock = bench.object(STOCK_BOTTLE_ID).unwrap();
        assert_eq!(stock.current_volume(), 1000.0);
        assert_eq!(stock.transfer_concentration(), Some(STOCK_CONCENTRATION));

        let unknown = bench.object(UNKNOWN_BOTTLE_ID).unwrap();
        assert_eq!(unknown.current_volume(), 500.0);
        assert_eq!(unknown.transfer_concentration(), Some(UNKNOWN_CONCENTRATION));

        let pipette = bench.pipette(PIPETTE_ID).unwrap();
        assert_eq!(pipette.current_volume, 0.0);
        assert_eq!(pipette.contents_concentration, 0.0);

        let cuvette = bench.cuvette(CUVETTE_ID).unwrap();
        assert!(cuvette.is_clean);
        assert!(!cuvette.is_in_spec);
        assert_eq!(cuvette.max_volume, 4.0);

        for id in TUBE_IDS {
            let tube = bench.object(id).unwrap();
            assert_eq!(tube.current_volume(), 0.0);
            assert_eq!(tube.max_volume(), 10.0);
        }
    }

    #[test]
    fn test_waste_starts_without_concentration() {
        let bench = starting_bench();
        let waste = bench.object(WASTE_ID).unwrap();
        assert_eq!(waste.transfer_concentration(), None);
        assert_eq!(waste.max_volume(), 250.0);
    }

    #[test]
    fn test_typed_accessors_reject_wrong_kind() {
        let bench = starting_bench();
        assert!(bench.pipette(CUVETTE_ID).is_none());
        assert!(bench.cuvette(PIPETTE_ID).is_none());
        assert!(bench.pipette("no_such_object").is_none());
    }

    #[test]
    fn test_total_liquid_volume() {
        let bench = starting_bench();
        // 1000 + 1000 + 500 from the bottles, everything else empty.
        assert_eq!(bench.total_liquid_volume(), 2500.0);
    }

    #[test]
    fn test_instrument_default() {
        let instrument = InstrumentState::default();
        assert_eq!(instrument.reading, "-- %T");
        assert_eq!(instrument.wavelength, TARGET_WAVELENGTH);
        assert!(!instrument.is_zeroed);
        assert!(!instrument.absorbance_mode);
        assert!(instrument.cuvette_inside_id.is_none());
    }
}
