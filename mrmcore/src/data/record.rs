use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

/// Column names of fragment library partitions (target library and the
/// fragment-level interference collection).
pub mod fragment_columns {
    pub const KEY: &str = "InChIKey";
    pub const NAME: &str = "Name";
    pub const NAME_MERGED: &str = "Name_x";
    pub const PRECURSOR_MZ: &str = "PrecursorMZ";
    pub const RT: &str = "RT";
    pub const FRAGMENT_MZ: &str = "MSMS";
    pub const INTENSITY: &str = "intensity";
    pub const NCE: &str = "NCE";
    pub const CE: &str = "CE";
    pub const ION_MODE: &str = "Ion_mode";
    pub const PRECURSOR_TYPE: &str = "Precursor_type";
}

/// Column names of aligned-spectrum partitions used by the overlap method.
pub mod spectrum_columns {
    pub const ALIGNMENT_ID: &str = "Alignment ID";
    pub const AVERAGE_MZ: &str = "Average Mz";
    pub const AVERAGE_RT: &str = "Average Rt(min)";
    pub const CE: &str = "CE";
    pub const SPECTRUM: &str = "MS/MS spectrum";
}

/// Parses a numeric cell, mapping blanks and unparseable text to NaN.
///
/// Real-world libraries carry empty or textual cells in numeric columns; a
/// single bad cell must not invalidate the row.
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    struct LenientVisitor;

    impl<'de> Visitor<'de> for LenientVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number or numeric text")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_i128<E: de::Error>(self, v: i128) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_bool<E: de::Error>(self, _v: bool) -> Result<f64, E> {
            Ok(f64::NAN)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            Ok(v.trim().parse::<f64>().unwrap_or(f64::NAN))
        }

        fn visit_none<E: de::Error>(self) -> Result<f64, E> {
            Ok(f64::NAN)
        }

        fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
            Ok(f64::NAN)
        }

        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<f64, D2::Error> {
            d.deserialize_any(LenientVisitor)
        }
    }

    deserializer.deserialize_any(LenientVisitor)
}

fn missing() -> f64 {
    f64::NAN
}

/// One fragment-ion observation of a compound.
///
/// The same shape serves the target library and the fragment-level
/// interference collection; columns absent from a partition fall back to
/// empty text or NaN.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FragmentRecord {
    #[serde(rename = "InChIKey", default)]
    pub key: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Name_x", default)]
    pub merged_name: Option<String>,
    #[serde(rename = "PrecursorMZ", default = "missing", deserialize_with = "lenient_f64")]
    pub precursor_mz: f64,
    #[serde(rename = "RT", default = "missing", deserialize_with = "lenient_f64")]
    pub retention_time: f64,
    #[serde(rename = "MSMS", default = "missing", deserialize_with = "lenient_f64")]
    pub fragment_mz: f64,
    #[serde(rename = "intensity", default = "missing", deserialize_with = "lenient_f64")]
    pub intensity: f64,
    #[serde(rename = "CE", default = "missing", deserialize_with = "lenient_f64")]
    pub collision_energy: f64,
    #[serde(rename = "NCE", default = "missing", deserialize_with = "lenient_f64")]
    pub normalized_collision_energy: f64,
    #[serde(rename = "Ion_mode", default)]
    pub ion_mode: String,
    #[serde(rename = "Precursor_type", default)]
    pub precursor_type: String,
}

impl FragmentRecord {
    pub fn new(
        key: &str,
        name: &str,
        precursor_mz: f64,
        retention_time: f64,
        fragment_mz: f64,
        intensity: f64,
        collision_energy: f64,
        normalized_collision_energy: f64,
        ion_mode: &str,
        precursor_type: &str,
    ) -> Self {
        FragmentRecord {
            key: key.to_string(),
            name: Some(name.to_string()),
            merged_name: None,
            precursor_mz,
            retention_time,
            fragment_mz,
            intensity,
            collision_energy,
            normalized_collision_energy,
            ion_mode: ion_mode.to_string(),
            precursor_type: precursor_type.to_string(),
        }
    }

    /// Name used in reports: the merged-table name when present, then the
    /// library name, then the key itself.
    pub fn display_name(&self) -> &str {
        fn non_empty(s: &Option<String>) -> Option<&str> {
            s.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("nan"))
        }
        non_empty(&self.merged_name)
            .or_else(|| non_empty(&self.name))
            .unwrap_or_else(|| self.key.trim())
    }
}

/// One aligned spectrum carrying a whole encoded peak list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpectrumRecord {
    #[serde(rename = "Alignment ID", default)]
    pub alignment_id: String,
    #[serde(rename = "Average Mz", default = "missing", deserialize_with = "lenient_f64")]
    pub average_mz: f64,
    #[serde(rename = "Average Rt(min)", default = "missing", deserialize_with = "lenient_f64")]
    pub average_rt: f64,
    #[serde(rename = "CE", default = "missing", deserialize_with = "lenient_f64")]
    pub collision_energy: f64,
    #[serde(rename = "MS/MS spectrum", default)]
    pub spectrum: String,
}

impl SpectrumRecord {
    pub fn new(alignment_id: &str, average_mz: f64, average_rt: f64, collision_energy: f64, spectrum: &str) -> Self {
        SpectrumRecord {
            alignment_id: alignment_id.to_string(),
            average_mz,
            average_rt,
            collision_energy,
            spectrum: spectrum.to_string(),
        }
    }

    pub fn peaks(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        parse_peaks(&self.spectrum)
    }
}

/// Iterates `mz:intensity` tokens of an encoded peak list.
///
/// Tokens are whitespace separated; tokens without a colon or with
/// unparseable numbers are skipped.
///
/// # Examples
///
/// ```
/// use mrmcore::data::record::parse_peaks;
///
/// let peaks: Vec<(f64, f64)> = parse_peaks("100:5 bad 150.5:7").collect();
/// assert_eq!(peaks, vec![(100.0, 5.0), (150.5, 7.0)]);
/// ```
pub fn parse_peaks(encoded: &str) -> impl Iterator<Item = (f64, f64)> + '_ {
    encoded.split_whitespace().filter_map(|token| {
        let (mz, intensity) = token.split_once(':')?;
        let mz = mz.parse::<f64>().ok()?;
        let intensity = intensity.parse::<f64>().ok()?;
        Some((mz, intensity))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_peaks_skips_malformed_tokens() {
        let peaks: Vec<(f64, f64)> = parse_peaks("100.1:50 garbage 101.2:x 102.5:25.5\t103:1").collect();
        assert_eq!(peaks, vec![(100.1, 50.0), (102.5, 25.5), (103.0, 1.0)]);
    }

    #[test]
    fn test_parse_peaks_empty() {
        assert_eq!(parse_peaks("").count(), 0);
        assert_eq!(parse_peaks("   ").count(), 0);
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut record = FragmentRecord::new("KEY-A", "Atrazine", 216.1, 5.0, 174.1, 100.0, 20.0, 40.0, "P", "[M+H]+");
        assert_eq!(record.display_name(), "Atrazine");

        record.merged_name = Some("Atrazine (merged)".to_string());
        assert_eq!(record.display_name(), "Atrazine (merged)");

        record.merged_name = Some("  ".to_string());
        record.name = None;
        assert_eq!(record.display_name(), "KEY-A");
    }

    #[test]
    fn test_lenient_f64_from_json() {
        let record: SpectrumRecord = serde_json::from_str(
            r#"{"Alignment ID": "7", "Average Mz": "n/a", "Average Rt(min)": 3, "CE": 20.5, "MS/MS spectrum": "1:2"}"#,
        )
        .unwrap();
        assert!(record.average_mz.is_nan());
        assert_eq!(record.average_rt, 3.0);
        assert_eq!(record.collision_energy, 20.5);
        assert_eq!(record.peaks().count(), 1);
    }
}
