//! Pages and metadata assembled from the ledger after units complete.

use std::collections::BTreeMap;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::Writer;

use crate::model::{Unit, UnitKind};

/// Orders step keys numerically when they are years, lexically otherwise.
fn step_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Builds the `<metadata id="country-data">` block from the per-leaf fills
/// recorded on a partition's units, grouped by step.
///
/// Returns `None` when no unit carries fill data.
pub fn metadata_block(units: &[Unit]) -> Option<String> {
    let mut by_step: Vec<(&str, &Unit)> = units
        .iter()
        .filter(|u| !u.fills.is_empty())
        .filter_map(|u| u.key.step.as_deref().map(|step| (step, u)))
        .collect();
    if by_step.is_empty() {
        return None;
    }
    by_step.sort_by(|a, b| step_order(a.0, b.0));

    match write_metadata(&by_step).map(String::from_utf8) {
        Ok(Ok(block)) => Some(block),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Metadata block is not valid UTF-8");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to write metadata block");
            None
        }
    }
}

fn write_metadata(by_step: &[(&str, &Unit)]) -> Result<Vec<u8>, quick_xml::Error> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Start(
        BytesStart::new("metadata").with_attributes([("id", "country-data")]),
    ))?;
    writer.write_event(Event::Start(BytesStart::new("years")))?;
    for (step, unit) in by_step {
        writer.write_event(Event::Start(
            BytesStart::new("year").with_attributes([("value", *step)]),
        ))?;
        for fill in &unit.fills {
            writer.write_event(Event::Empty(BytesStart::new("country").with_attributes([
                ("name", fill.country.as_str()),
                ("fill", fill.fill.as_str()),
            ])))?;
        }
        writer.write_event(Event::End(BytesEnd::new("year")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("years")))?;
    writer.write_event(Event::End(BytesEnd::new("metadata")))?;
    Ok(writer.into_inner())
}

/// Builds the gallery template page listing every successfully published
/// map file, per region and ordered by year.
///
/// Returns `None` when there is nothing to list.
pub fn gallery_page(units: &[Unit]) -> Option<String> {
    let mut regions: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
    for unit in units {
        if unit.key.kind != UnitKind::Map || !unit.status.is_success() {
            continue;
        }
        let (Some(step), Some(file_name)) = (unit.key.step.as_deref(), unit.file_name.as_deref())
        else {
            continue;
        };
        regions
            .entry(unit.key.partition.as_str())
            .or_default()
            .push((step, file_name));
    }
    if regions.is_empty() {
        return None;
    }

    let mut page = String::from("{{owidslidersrcs|id=gallery|widths=640|heights=640\n");
    for (region, mut files) in regions {
        files.sort_by(|a, b| step_order(a.0, b.0));
        page.push_str(&format!("|gallery-{}=\n", region));
        for (year, file_name) in files {
            page.push_str(&format!("File:{}!year={}\n", file_name, year));
        }
    }
    page.push_str("}}\n");
    Some(page)
}
