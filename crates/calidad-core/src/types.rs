// crates/calidad-core/src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The three pollution parameters scored by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parameter {
    /// Biochemical oxygen demand (DBO).
    Bod,
    /// Chemical oxygen demand (DQO).
    Cod,
    /// Total suspended solids (SST).
    Tss,
}

impl Parameter {
    pub const ALL: [Parameter; 3] = [Parameter::Bod, Parameter::Cod, Parameter::Tss];

    pub fn code(&self) -> &'static str {
        match self {
            Parameter::Bod => "DBO",
            Parameter::Cod => "DQO",
            Parameter::Tss => "SST",
        }
    }

    /// Inclusive upper bounds (mg/L) of the first four CONAGUA bands; above
    /// the last one is "Fuertemente contaminada".
    pub fn band_limits(&self) -> [f64; 4] {
        match self {
            Parameter::Bod => [3.0, 6.0, 30.0, 120.0],
            Parameter::Cod => [10.0, 20.0, 40.0, 200.0],
            Parameter::Tss => [25.0, 75.0, 150.0, 400.0],
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityBand {
    Excellent,
    Good,
    Acceptable,
    Polluted,
    HeavilyPolluted,
}

impl QualityBand {
    pub const BEST_INDEX: i16 = 1;
    pub const WORST_INDEX: i16 = 5;

    /// Per-parameter index: 1 is the best band, 5 the worst.
    pub fn index(&self) -> i16 {
        match self {
            QualityBand::Excellent => 1,
            QualityBand::Good => 2,
            QualityBand::Acceptable => 3,
            QualityBand::Polluted => 4,
            QualityBand::HeavilyPolluted => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            QualityBand::Excellent => "Excelente",
            QualityBand::Good => "Buena calidad",
            QualityBand::Acceptable => "Aceptable",
            QualityBand::Polluted => "Contaminada",
            QualityBand::HeavilyPolluted => "Fuertemente contaminada",
        }
    }

    pub fn is_polluted(&self) -> bool {
        *self >= QualityBand::Polluted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrafficLight {
    #[serde(rename = "VERDE")]
    Green,
    #[serde(rename = "AMARILLO")]
    Yellow,
    #[serde(rename = "ROJO")]
    Red,
}

impl TrafficLight {
    /// Value stored in the `semaforo` column.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            TrafficLight::Green => "VERDE",
            TrafficLight::Yellow => "AMARILLO",
            TrafficLight::Red => "ROJO",
        }
    }
}

impl fmt::Display for TrafficLight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for TrafficLight {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "VERDE" | "GREEN" => Ok(TrafficLight::Green),
            "AMARILLO" | "YELLOW" => Ok(TrafficLight::Yellow),
            "ROJO" | "RED" => Ok(TrafficLight::Red),
            other => Err(format!("unknown traffic-light value '{other}'")),
        }
    }
}

/// One transformed measurement at one site for one period. Field names
/// serialize to the column names of `water_data.calidad_agua_clean`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaterQualityRecord {
    #[serde(rename = "clave_sitio")]
    pub site_key: String,
    #[serde(rename = "sitio")]
    pub site_name: Option<String>,
    #[serde(rename = "organismo_de_cuenca")]
    pub basin_authority: Option<String>,
    #[serde(rename = "estado")]
    pub state: Option<String>,
    #[serde(rename = "municipio")]
    pub municipality: Option<String>,
    #[serde(rename = "cuenca")]
    pub basin: Option<String>,
    #[serde(rename = "cuerpo_de_agua")]
    pub water_body: Option<String>,
    #[serde(rename = "tipo")]
    pub site_type: Option<String>,
    #[serde(rename = "subtipo")]
    pub subtype: Option<String>,
    #[serde(rename = "longitud")]
    pub longitude: Option<f64>,
    #[serde(rename = "latitud")]
    pub latitude: Option<f64>,
    #[serde(rename = "periodo")]
    pub period: String,
    #[serde(rename = "dbo_mg_l")]
    pub bod_mg_l: f64,
    #[serde(rename = "calidad_dbo")]
    pub bod_label: String,
    #[serde(rename = "dqo_mg_l")]
    pub cod_mg_l: f64,
    #[serde(rename = "calidad_dqo")]
    pub cod_label: String,
    #[serde(rename = "sst_mg_l")]
    pub tss_mg_l: f64,
    #[serde(rename = "calidad_sst")]
    pub tss_label: String,
    #[serde(rename = "indice_calidad_dbo")]
    pub bod_index: i16,
    #[serde(rename = "indice_calidad_dqo")]
    pub cod_index: i16,
    #[serde(rename = "indice_calidad_sst")]
    pub tss_index: i16,
    #[serde(rename = "indice_calidad_general")]
    pub overall_index: f64,
    #[serde(rename = "semaforo")]
    pub traffic_light: TrafficLight,
    #[serde(rename = "contaminantes")]
    pub contaminants: Option<String>,
    #[serde(skip)]
    pub source_line: u64,
}

impl WaterQualityRecord {
    pub fn identity(&self) -> (&str, &str) {
        (&self.site_key, &self.period)
    }
}
