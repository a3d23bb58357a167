use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::model::Column;

static HEADER_ALIASES: Lazy<HashMap<&'static str, Column>> = Lazy::new(|| {
    let mut aliases = HashMap::new();
    for column in Column::ALL {
        aliases.insert(column.canonical_name(), column);
    }
    let extra: [(&str, Column); 22] = [
        ("clave", Column::SiteKey),
        ("clave_de_sitio", Column::SiteKey),
        ("nombre_sitio", Column::SiteName),
        ("nombre_del_sitio", Column::SiteName),
        ("organismo", Column::BasinAuthority),
        ("oc", Column::BasinAuthority),
        ("cuerpo_agua", Column::WaterBody),
        ("tipo_cuerpo", Column::SiteType),
        ("subtipo_cuerpo", Column::Subtype),
        ("lon", Column::Longitude),
        ("lat", Column::Latitude),
        ("año", Column::Period),
        ("dbo", Column::Bod),
        ("dbo_mg/l", Column::Bod),
        ("dbo5_mg/l", Column::Bod),
        ("dqo", Column::Cod),
        ("dqo_mg/l", Column::Cod),
        ("sst", Column::Tss),
        ("sst_mg/l", Column::Tss),
        ("semáforo", Column::TrafficLight),
        ("contaminante", Column::Contaminants),
        ("contaminantes_detectados", Column::Contaminants),
    ];
    aliases.extend(extra);
    aliases
});

const ABSENT_MARKERS: [&str; 6] = ["nan", "na", "n/a", "null", "none", "-"];

/// Trims, replaces inner spaces with `_` and lowercases a header cell.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

pub fn resolve_column(raw: &str) -> Option<Column> {
    HEADER_ALIASES.get(normalize_header(raw).as_str()).copied()
}

pub(crate) fn clean_value(raw: &str, column: Column, decimal_comma: bool) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || ABSENT_MARKERS
            .iter()
            .any(|marker| trimmed.eq_ignore_ascii_case(marker))
    {
        return None;
    }
    if decimal_comma && column.is_numeric() {
        return Some(trimmed.replace(',', "."));
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_conagua_headers() {
        assert_eq!(normalize_header(" CLAVE SITIO "), "clave_sitio");
        assert_eq!(normalize_header("DBO_mg/L"), "dbo_mg/l");
        assert_eq!(resolve_column("DQO_mg/L"), Some(Column::Cod));
        assert_eq!(resolve_column("Organismo de Cuenca"), Some(Column::BasinAuthority));
        assert_eq!(resolve_column("COLI_FEC"), None);
    }

    #[test]
    fn absent_markers_become_none() {
        assert_eq!(clean_value("  ", Column::Bod, false), None);
        assert_eq!(clean_value("NaN", Column::Bod, false), None);
        assert_eq!(clean_value("2,5", Column::Bod, true).as_deref(), Some("2.5"));
        assert_eq!(clean_value("Río, Lerma", Column::WaterBody, true).as_deref(), Some("Río, Lerma"));
    }
}
