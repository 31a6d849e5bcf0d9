//! The experiment data table: one row per calibration standard plus the
//! unknown sample. Rows hold raw measured numbers; display formatting and
//! CSV export live here too so every surface renders them the same way.

use crate::lab_objects::ObjectId;
use crate::optics::{concentration_from_dilution, round_to, KNOWN_SLOPE};
use serde::{Deserialize, Serialize};

pub const UNKNOWN_ROW_ID: &str = "unknown";

/// A recorded absorbance. `OffScale` stands in for the infinite value so
/// rows survive JSON round-trips (`f64::INFINITY` does not).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Absorbance {
    Value(f64),
    OffScale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRow {
    pub id: ObjectId,
    pub solution: String,
    pub dilution: String,
    /// Nominal true concentration in µM; `None` for the unknown sample.
    pub concentration: Option<f64>,
    pub measured_percent_t: Option<f64>,
    pub transmittance: Option<f64>,
    pub neg_log_t: Option<Absorbance>,
}

impl DataRow {
    /// Stores a measurement, applying the table's rounding conventions.
    pub fn record(&mut self, percent_t: f64, absorbance: f64) {
        self.measured_percent_t = Some(round_to(percent_t, 1));
        self.transmittance = Some(round_to(percent_t / 100.0, 3));
        self.neg_log_t = Some(if absorbance.is_infinite() || absorbance > 10.0 {
            Absorbance::OffScale
        } else {
            Absorbance::Value(round_to(absorbance, 4))
        });
    }

    pub fn display(&self) -> DataRowDisplay {
        let measured_percent_t = match self.measured_percent_t {
            Some(p) => format!("{:.1}", p),
            None => "--".to_string(),
        };
        let transmittance = match self.transmittance {
            Some(t) => format!("{:.3}", t),
            None => "--".to_string(),
        };
        // The unknown row derives its concentration from the measurement;
        // the standards carry a nominal one from the dilution recipe.
        let (concentration, neg_log_t) = if self.id == UNKNOWN_ROW_ID {
            match self.neg_log_t {
                Some(Absorbance::Value(a)) => {
                    (format!("{:.3}", a / KNOWN_SLOPE), format!("{:.4}", a))
                }
                Some(Absorbance::OffScale) => ("Too High".to_string(), ">1.5".to_string()),
                None => ("N/A".to_string(), "--".to_string()),
            }
        } else {
            let concentration = match self.concentration {
                Some(c) => format!("{:.3}", c),
                None => "--".to_string(),
            };
            let neg_log_t = match self.neg_log_t {
                Some(Absorbance::Value(a)) => format!("{:.4}", a),
                Some(Absorbance::OffScale) => ">1.5".to_string(),
                None => "--".to_string(),
            };
            (concentration, neg_log_t)
        };
        DataRowDisplay {
            id: self.id.clone(),
            solution: self.solution.clone(),
            dilution: self.dilution.clone(),
            concentration,
            measured_percent_t,
            transmittance,
            neg_log_t,
        }
    }
}

/// Display-formatted row values, shared by the state summary and CSV export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRowDisplay {
    pub id: ObjectId,
    pub solution: String,
    pub dilution: String,
    pub concentration: String,
    pub measured_percent_t: String,
    pub transmittance: String,
    pub neg_log_t: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    pub rows: Vec<DataRow>,
}

fn standard_row(id: &str, solution: &str, stock_vol: f64, water_vol: f64) -> DataRow {
    DataRow {
        id: id.to_string(),
        solution: solution.to_string(),
        dilution: format!("{} / {}", stock_vol, water_vol),
        concentration: Some(concentration_from_dilution(stock_vol, water_vol)),
        measured_percent_t: None,
        transmittance: None,
        neg_log_t: None,
    }
}

impl DataTable {
    /// The fixed table for the guided experiment, in bench order.
    pub fn initial() -> DataTable {
        let mixes = [
            ("tube_10_0", "1 (Stock)", 10.0, 0.0),
            ("tube_8_2", "2", 8.0, 2.0),
            ("tube_6_4", "3", 6.0, 4.0),
            ("tube_4_6", "4", 4.0, 6.0),
            ("tube_2_8", "5", 2.0, 8.0),
            ("tube_0_10", "6 (Blank)", 0.0, 10.0),
        ];
        let mut rows: Vec<DataRow> = mixes
            .into_iter()
            .map(|(id, solution, stock, water)| standard_row(id, solution, stock, water))
            .collect();
        rows.push(DataRow {
            id: UNKNOWN_ROW_ID.to_string(),
            solution: "Unknown Drink".to_string(),
            dilution: "N/A".to_string(),
            concentration: None,
            measured_percent_t: None,
            transmittance: None,
            neg_log_t: None,
        });
        DataTable { rows }
    }

    pub fn row(&self, id: &str) -> Option<&DataRow> {
        self.rows.iter().find(|row| row.id == id)
    }

    pub fn row_mut(&mut self, id: &str) -> Option<&mut DataRow> {
        self.rows.iter_mut().find(|row| row.id == id)
    }

    /// (concentration, absorbance) pairs for every measured standard with a
    /// finite absorbance, in table order. The unknown is never included.
    pub fn measured_points(&self) -> Vec<(f64, f64)> {
        self.rows
            .iter()
            .filter(|row| row.id != UNKNOWN_ROW_ID)
            .filter_map(|row| match (row.concentration, row.neg_log_t) {
                (Some(conc), Some(Absorbance::Value(abs))) => Some((conc, abs)),
                _ => None,
            })
            .collect()
    }

    pub fn unknown_absorbance(&self) -> Option<f64> {
        match self.row(UNKNOWN_ROW_ID)?.neg_log_t? {
            Absorbance::Value(a) => Some(a),
            Absorbance::OffScale => None,
        }
    }

    /// Concentration of the unknown back-calculated through the known
    /// calibration slope, once its absorbance has been measured on scale.
    pub fn derived_unknown_concentration(&self) -> Option<f64> {
        self.unknown_absorbance().map(|a| a / KNOWN_SLOPE)
    }

    pub fn write_csv<W: std::io::Write>(&self, out: W) -> csv::Result<()> {
        let mut wtr = csv::Writer::from_writer(out);
        wtr.write_record([
            "Solution",
            "Dilution (Stock/Water)",
            "Concentration (µM)",
            "Measured %T",
            "Transmittance",
            "Absorbance (-log T)",
        ])?;
        for row in &self.rows {
            let d = row.display();
            wtr.write_record([
                &d.solution,
                &d.dilution,
                &d.concentration,
                &d.measured_percent_t,
                &d.transmittance,
                &d.neg_log_t,
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn save_csv_to_path(&self, path: &str) -> anyhow::Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_rows() {
        let table = DataTable::initial();
        assert_eq!(table.rows.len(), 7);
        assert_eq!(table.rows[0].id, "tube_10_0");
        assert_eq!(table.rows[0].concentration, Some(2.31));
        assert!((table.rows[1].concentration.unwrap() - 1.848).abs() < 1e-12);
        assert_eq!(table.rows[5].concentration, Some(0.0));
        let unknown = table.row(UNKNOWN_ROW_ID).unwrap();
        assert_eq!(unknown.concentration, None);
        assert_eq!(unknown.neg_log_t, None);
        assert_eq!(unknown.dilution, "N/A");
    }

    #[test]
    fn test_dilution_labels() {
        let table = DataTable::initial();
        assert_eq!(table.rows[0].dilution, "10 / 0");
        assert_eq!(table.rows[5].dilution, "0 / 10");
    }

    #[test]
    fn test_record_rounds_fields() {
        let mut table = DataTable::initial();
        table.row_mut("tube_10_0").unwrap().record(49.0, 0.30980392);
        let row = table.row("tube_10_0").unwrap();
        assert_eq!(row.measured_percent_t, Some(49.0));
        assert_eq!(row.transmittance, Some(0.49));
        assert_eq!(row.neg_log_t, Some(Absorbance::Value(0.3098)));
    }

    #[test]
    fn test_record_off_scale() {
        let mut table = DataTable::initial();
        table.row_mut("tube_10_0").unwrap().record(0.0, f64::INFINITY);
        let row = table.row("tube_10_0").unwrap();
        assert_eq!(row.neg_log_t, Some(Absorbance::OffScale));
        assert_eq!(row.display().neg_log_t, ">1.5");
    }

    #[test]
    fn test_display_unmeasured() {
        let table = DataTable::initial();
        let stock = table.rows[0].display();
        assert_eq!(stock.concentration, "2.310");
        assert_eq!(stock.measured_percent_t, "--");
        assert_eq!(stock.transmittance, "--");
        assert_eq!(stock.neg_log_t, "--");
        let unknown = table.row(UNKNOWN_ROW_ID).unwrap().display();
        assert_eq!(unknown.concentration, "N/A");
        assert_eq!(unknown.neg_log_t, "--");
    }

    #[test]
    fn test_display_unknown_measured() {
        let mut table = DataTable::initial();
        table.row_mut(UNKNOWN_ROW_ID).unwrap().record(39.0, 0.40893539);
        let unknown = table.row(UNKNOWN_ROW_ID).unwrap().display();
        assert_eq!(unknown.neg_log_t, "0.4089");
        // 0.4089 / 0.1358 = 3.011...
        assert_eq!(unknown.concentration, "3.011");
        assert_eq!(unknown.measured_percent_t, "39.0");
    }

    #[test]
    fn test_display_unknown_off_scale() {
        let mut table = DataTable::initial();
        table.row_mut(UNKNOWN_ROW_ID).unwrap().record(0.0, f64::INFINITY);
        let unknown = table.row(UNKNOWN_ROW_ID).unwrap().display();
        assert_eq!(unknown.concentration, "Too High");
        assert_eq!(unknown.neg_log_t, ">1.5");
        assert_eq!(table.derived_unknown_concentration(), None);
    }

    #[test]
    fn test_measured_points_skip_unmeasured_and_unknown() {
        let mut table = DataTable::initial();
        table.row_mut("tube_10_0").unwrap().record(49.0, 0.3098);
        table.row_mut("tube_0_10").unwrap().record(100.0, 0.0);
        table.row_mut(UNKNOWN_ROW_ID).unwrap().record(39.0, 0.4089);
        let points = table.measured_points();
        assert_eq!(points, vec![(2.31, 0.3098), (0.0, 0.0)]);
    }

    #[test]
    fn test_absorbance_survives_json() {
        let mut table = DataTable::initial();
        table.row_mut("tube_10_0").unwrap().record(0.0, f64::INFINITY);
        table.row_mut("tube_8_2").unwrap().record(58.0, 0.2366);
        let json = serde_json::to_string(&table).unwrap();
        let back: DataTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
        assert_eq!(back.rows[0].neg_log_t, Some(Absorbance::OffScale));
    }

    #[test]
    fn test_csv_export() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("table.csv");
        let mut table = DataTable::initial();
        table.row_mut("tube_10_0").unwrap().record(49.0, 0.3098);
        table
            .save_csv_to_path(path.to_str().unwrap())
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Solution,"));
        assert!(text.contains("1 (Stock),10 / 0,2.310,49.0,0.490,0.3098"));
        assert!(text.contains("Unknown Drink,N/A,N/A,--,--,--"));
    }
}
