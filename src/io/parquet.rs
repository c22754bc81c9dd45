//! Parquet input panels and output tables.
//!
//! Months are stored as `YYYY-MM` strings. Missing numeric values are
//! nulls; they are read back as NaN.

use crate::core::{
    Forecast, ForecastKey, ForecastSource, ForecastStep, ForecastTable, GeoLevel, GeographyId, Month,
};
use crate::data::{MacroSeries, RawPanel, POLICY_CHANGE};
use crate::error::{ForecastError, Result};
use crate::pipeline::CvReport;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

const PANEL_KEYS: [&str; 7] = [
    "geography",
    "level",
    "parent",
    "month",
    "appreciation",
    "volume",
    "price_per_area",
];

/// Read region and area panels.
///
/// Required columns: `geography`, `level`, `month`, `volume`,
/// `price_per_area`. `parent` (areas) and `appreciation` are optional;
/// every other numeric column becomes a monthly local feature. Rows may
/// be in any order; calendar gaps become missing values.
pub fn read_panel_parquet(path: impl AsRef<Path>) -> Result<Vec<RawPanel>> {
    let df = read_frame(path.as_ref())?;
    let geography = str_column(&df, "geography")?;
    let level = str_column(&df, "level")?;
    let months = month_column(&df, "month")?;
    let volume = f64_column(&df, "volume")?;
    let price = f64_column(&df, "price_per_area")?;
    let parent = if has_column(&df, "parent") {
        str_column(&df, "parent")?
    } else {
        vec![None; df.height()]
    };
    let appreciation = if has_column(&df, "appreciation") {
        Some(f64_column(&df, "appreciation")?)
    } else {
        None
    };
    let mut features = BTreeMap::new();
    for column in df.get_columns() {
        let name = column.name().as_str();
        if !PANEL_KEYS.contains(&name) && is_numeric(column.dtype()) {
            features.insert(name.to_string(), f64_column(&df, name)?);
        }
    }

    let mut panels: BTreeMap<(GeoLevel, GeographyId), RawPanel> = BTreeMap::new();
    for row in 0..df.height() {
        let id = geography[row]
            .clone()
            .ok_or_else(|| ForecastError::Storage(format!("row {row}: null geography")))?;
        let level = level[row]
            .as_deref()
            .and_then(GeoLevel::parse)
            .ok_or_else(|| ForecastError::Storage(format!("row {row}: invalid level")))?;
        let panel = panels
            .entry((level, GeographyId::new(id.clone())))
            .or_insert_with(|| {
                let mut raw = RawPanel::new(id, level);
                if appreciation.is_some() {
                    raw.appreciation = Some(Vec::new());
                }
                raw
            });
        if panel.parent.is_none() {
            panel.parent = parent[row]
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(GeographyId::new);
        }
        panel.months.push(months[row]);
        panel.volume.push(volume[row]);
        panel.price_per_area.push(price[row]);
        if let (Some(column), Some(values)) = (panel.appreciation.as_mut(), appreciation.as_ref()) {
            column.push(values[row]);
        }
        for (name, values) in &features {
            panel.features.entry(name.clone()).or_default().push(values[row]);
        }
    }
    debug!(panels = panels.len(), rows = df.height(), "read panel parquet");
    panels.into_values().map(RawPanel::fill_calendar).collect()
}

/// Read macroeconomic series: a `month` column plus numeric columns.
///
/// A `policy_change` column marks change months with values >= 0.5.
pub fn read_macro_parquet(path: impl AsRef<Path>) -> Result<MacroSeries> {
    let df = read_frame(path.as_ref())?;
    let months = month_column(&df, "month")?;
    let mut series = MacroSeries::new();
    for column in df.get_columns() {
        let name = column.name().as_str();
        if name == "month" || !is_numeric(column.dtype()) {
            continue;
        }
        let values = f64_column(&df, name)?;
        if name == POLICY_CHANGE {
            let changes = months
                .iter()
                .zip(&values)
                .filter(|(_, v)| **v >= 0.5)
                .map(|(m, _)| *m);
            series = series.with_policy_changes(changes);
        } else {
            series = series.with_column(name, months.iter().copied().zip(values));
        }
    }
    Ok(series)
}

/// Write every forecast step as one row.
pub fn write_forecasts_parquet(table: &ForecastTable, path: impl AsRef<Path>) -> Result<()> {
    let rows = table.iter().map(|f| f.horizon()).sum();
    let mut geography = Vec::with_capacity(rows);
    let mut level = Vec::with_capacity(rows);
    let mut scenario = Vec::with_capacity(rows);
    let mut source = Vec::with_capacity(rows);
    let mut horizon = Vec::with_capacity(rows);
    let mut month = Vec::with_capacity(rows);
    let mut point = Vec::with_capacity(rows);
    let mut lower = Vec::with_capacity(rows);
    let mut upper = Vec::with_capacity(rows);
    let mut clamped = Vec::with_capacity(rows);
    for forecast in table.iter() {
        let label = forecast.source().label();
        for step in forecast.steps() {
            geography.push(forecast.geography().to_string());
            level.push(forecast.level().as_str());
            scenario.push(forecast.scenario().to_string());
            source.push(label.clone());
            horizon.push(step.horizon as u32);
            month.push(step.month.to_string());
            point.push(step.point);
            lower.push(step.lower);
            upper.push(step.upper);
            clamped.push(step.clamped);
        }
    }
    let mut df = df!(
        "geography" => geography,
        "level" => level,
        "scenario" => scenario,
        "source" => source,
        "horizon" => horizon,
        "month" => month,
        "point" => point,
        "lower" => lower,
        "upper" => upper,
        "clamped" => clamped
    )?;
    write_frame(&mut df, path.as_ref())
}

/// Read a table written by [`write_forecasts_parquet`].
pub fn read_forecasts_parquet(path: impl AsRef<Path>) -> Result<ForecastTable> {
    let df = read_frame(path.as_ref())?;
    let geography = str_column(&df, "geography")?;
    let level = str_column(&df, "level")?;
    let scenario = str_column(&df, "scenario")?;
    let source = str_column(&df, "source")?;
    let horizon = df.column("horizon")?.as_materialized_series().cast(&DataType::UInt32)?;
    let horizon = horizon.u32()?;
    let month = month_column(&df, "month")?;
    let point = f64_column(&df, "point")?;
    let lower = f64_column(&df, "lower")?;
    let upper = f64_column(&df, "upper")?;
    let clamped = df.column("clamped")?.as_materialized_series().bool()?.clone();

    let mut grouped: BTreeMap<ForecastKey, (ForecastSource, Vec<ForecastStep>)> = BTreeMap::new();
    for row in 0..df.height() {
        let missing = |name: &str| ForecastError::Storage(format!("row {row}: missing {name}"));
        let level = level[row]
            .as_deref()
            .and_then(GeoLevel::parse)
            .ok_or_else(|| missing("level"))?;
        let key = ForecastKey::new(
            GeographyId::new(geography[row].clone().ok_or_else(|| missing("geography"))?),
            level,
            scenario[row].clone().ok_or_else(|| missing("scenario"))?,
        );
        let source = source[row]
            .as_deref()
            .and_then(ForecastSource::parse)
            .ok_or_else(|| missing("source"))?;
        let step = ForecastStep {
            horizon: horizon.get(row).ok_or_else(|| missing("horizon"))? as usize,
            month: month[row],
            point: point[row],
            lower: lower[row],
            upper: upper[row],
            clamped: clamped.get(row).unwrap_or(false),
        };
        grouped
            .entry(key)
            .or_insert_with(|| (source, Vec::new()))
            .1
            .push(step);
    }
    let forecasts = grouped
        .into_iter()
        .map(|(key, (source, mut steps))| {
            steps.sort_by_key(|s| s.horizon);
            Forecast::from_steps(key, source, steps)
        })
        .collect();
    Ok(ForecastTable::new(forecasts))
}

/// Write per-fold metrics, one row per (fold, geography).
pub fn write_cv_parquet(report: &CvReport, path: impl AsRef<Path>) -> Result<()> {
    let rows: Vec<_> = report.fold_metrics().collect();
    let mut df = df!(
        "geography" => rows.iter().map(|m| m.geography.to_string()).collect::<Vec<_>>(),
        "level" => rows.iter().map(|m| m.level.as_str()).collect::<Vec<_>>(),
        "fold" => rows.iter().map(|m| m.fold as u32).collect::<Vec<_>>(),
        "cutoff" => rows.iter().map(|m| m.cutoff.to_string()).collect::<Vec<_>>(),
        "rmse" => rows.iter().map(|m| m.rmse).collect::<Vec<_>>(),
        "mae" => rows.iter().map(|m| m.mae).collect::<Vec<_>>(),
        "mape" => rows.iter().map(|m| m.mape).collect::<Vec<_>>(),
        "direction_correct" => rows.iter().map(|m| m.direction_correct).collect::<Vec<_>>(),
        "stepwise_directional_accuracy" => rows.iter().map(|m| m.stepwise_directional_accuracy).collect::<Vec<_>>(),
        "source" => rows.iter().map(|m| m.source.label()).collect::<Vec<_>>()
    )?;
    write_frame(&mut df, path.as_ref())
}

/// Write the per-geography aggregate of a backtest.
pub fn write_cv_summary_parquet(report: &CvReport, path: impl AsRef<Path>) -> Result<()> {
    let rows = &report.summaries;
    let mut df = df!(
        "geography" => rows.iter().map(|s| s.geography.to_string()).collect::<Vec<_>>(),
        "level" => rows.iter().map(|s| s.level.as_str()).collect::<Vec<_>>(),
        "folds" => rows.iter().map(|s| s.folds as u32).collect::<Vec<_>>(),
        "rmse" => rows.iter().map(|s| s.rmse).collect::<Vec<_>>(),
        "mae" => rows.iter().map(|s| s.mae).collect::<Vec<_>>(),
        "mape" => rows.iter().map(|s| s.mape).collect::<Vec<_>>(),
        "directional_accuracy" => rows.iter().map(|s| s.directional_accuracy).collect::<Vec<_>>(),
        "fallback_folds" => rows.iter().map(|s| s.fallback_folds as u32).collect::<Vec<_>>(),
        "accepted" => rows.iter().map(|s| s.accepted).collect::<Vec<_>>()
    )?;
    write_frame(&mut df, path.as_ref())
}

fn read_frame(path: &Path) -> Result<DataFrame> {
    let file = File::open(path)?;
    Ok(ParquetReader::new(file).finish()?)
}

fn write_frame(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    ParquetWriter::new(&mut file).finish(df)?;
    debug!(path = %path.display(), rows = df.height(), "wrote parquet");
    Ok(())
}

fn is_numeric(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Float64
            | DataType::Float32
            | DataType::Int64
            | DataType::Int32
            | DataType::UInt64
            | DataType::UInt32
    )
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

fn f64_column(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = df.column(name)?.as_materialized_series().cast(&DataType::Float64)?;
    Ok(series.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn str_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let series = df.column(name)?.as_materialized_series().cast(&DataType::String)?;
    Ok(series.str()?.into_iter().map(|v| v.map(str::to_string)).collect())
}

fn month_column(df: &DataFrame, name: &str) -> Result<Vec<Month>> {
    str_column(df, name)?
        .into_iter()
        .enumerate()
        .map(|(row, text)| match text {
            Some(text) => Month::parse(&text),
            None => Err(ForecastError::Storage(format!("row {row}: null {name}"))),
        })
        .collect()
}
