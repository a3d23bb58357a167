use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical columns of a CONAGUA surface water monitoring export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Column {
    SiteKey,
    SiteName,
    BasinAuthority,
    State,
    Municipality,
    Basin,
    WaterBody,
    SiteType,
    Subtype,
    Longitude,
    Latitude,
    Period,
    Bod,
    BodLabel,
    Cod,
    CodLabel,
    Tss,
    TssLabel,
    TrafficLight,
    Contaminants,
}

impl Column {
    pub const ALL: [Column; 20] = [
        Column::SiteKey,
        Column::SiteName,
        Column::BasinAuthority,
        Column::State,
        Column::Municipality,
        Column::Basin,
        Column::WaterBody,
        Column::SiteType,
        Column::Subtype,
        Column::Longitude,
        Column::Latitude,
        Column::Period,
        Column::Bod,
        Column::BodLabel,
        Column::Cod,
        Column::CodLabel,
        Column::Tss,
        Column::TssLabel,
        Column::TrafficLight,
        Column::Contaminants,
    ];

    pub const REQUIRED: [Column; 5] = [
        Column::SiteKey,
        Column::Period,
        Column::Bod,
        Column::Cod,
        Column::Tss,
    ];

    pub fn canonical_name(&self) -> &'static str {
        match self {
            Column::SiteKey => "clave_sitio",
            Column::SiteName => "sitio",
            Column::BasinAuthority => "organismo_de_cuenca",
            Column::State => "estado",
            Column::Municipality => "municipio",
            Column::Basin => "cuenca",
            Column::WaterBody => "cuerpo_de_agua",
            Column::SiteType => "tipo",
            Column::Subtype => "subtipo",
            Column::Longitude => "longitud",
            Column::Latitude => "latitud",
            Column::Period => "periodo",
            Column::Bod => "dbo_mg_l",
            Column::BodLabel => "calidad_dbo",
            Column::Cod => "dqo_mg_l",
            Column::CodLabel => "calidad_dqo",
            Column::Tss => "sst_mg_l",
            Column::TssLabel => "calidad_sst",
            Column::TrafficLight => "semaforo",
            Column::Contaminants => "contaminantes",
        }
    }

    /// Columns holding numbers; the semicolon export writes these with a decimal comma.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Column::Bod | Column::Cod | Column::Tss | Column::Longitude | Column::Latitude
        )
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// One data row after header normalization. Values are trimmed; absent cells are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub line: u64,
    values: Vec<Option<String>>,
}

impl RawRecord {
    pub fn new(line: u64) -> Self {
        Self {
            line,
            values: vec![None; Column::ALL.len()],
        }
    }

    pub fn get(&self, column: Column) -> Option<&str> {
        self.values[column.index()].as_deref()
    }

    pub fn set(&mut self, column: Column, value: Option<String>) {
        self.values[column.index()] = value;
    }

    pub fn with(mut self, column: Column, value: &str) -> Self {
        self.set(column, Some(value.to_string()));
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileMetadata {
    pub format: &'static str,
    pub delimiter: char,
    pub source_columns: Vec<String>,
    pub ignored_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ExtractedFile {
    pub metadata: FileMetadata,
    pub records: Vec<RawRecord>,
    pub rows_read: usize,
    pub duplicates_dropped: usize,
}
