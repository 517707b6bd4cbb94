//! Reading precipitation series from NetCDF and writing predictions back.
use std::path::Path;

use burn::config::Config;
use ndarray::{Array3, ArrayView3};
use netcdf::AttributeValue;
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};

/// Time-indexed precipitation frames plus their timestamps.
#[derive(Debug, Clone)]
pub struct PrecipSeries {
    /// `[time, lat, lon]`
    pub pr: Array3<f32>,
    pub time: Vec<f64>,
}

/// Grid declared by exported files.
#[derive(Config, Debug)]
pub struct ExportConfig {
    #[config(default = 64)]
    pub lat_len: usize,
    #[config(default = 128)]
    pub lon_len: usize,
}

/// Read `pr` and `time` from a NetCDF file.
pub fn load_series(file: &netcdf::File) -> PipelineResult<PrecipSeries> {
    let time: Vec<f64> = variable(file, "time")?.get_values(..)?;

    let pr_var = variable(file, "pr")?;
    let dims: Vec<usize> = pr_var.dimensions().iter().map(|d| d.len()).collect();
    let [frames, lat, lon] = dims[..] else {
        return Err(PipelineError::InvalidGrid(format!(
            "`pr` must be [time, lat, lon], found {} dimensions",
            dims.len()
        )));
    };
    let values: Vec<f32> = pr_var.get_values(..)?;
    let pr = Array3::from_shape_vec((frames, lat, lon), values)?;

    info!(frames, lat, lon, "Loaded precipitation series");
    Ok(PrecipSeries { pr, time })
}

/// Read a 1-D coordinate variable such as `lat` or `lon`.
pub fn read_coordinate(file: &netcdf::File, name: &str) -> PipelineResult<Vec<f32>> {
    Ok(variable(file, name)?.get_values(..)?)
}

/// Write `values` (`[time, lat, lon]`) and their `times` to `filename`,
/// copying coordinates and units from `reference`.
///
/// Shapes are not checked here; a mismatch with the declared grid surfaces
/// as the NetCDF library's error.
pub fn export_netcdf(
    values: ArrayView3<f32>,
    reference: &netcdf::File,
    filename: &Path,
    times: &[f64],
    config: &ExportConfig,
) -> PipelineResult<()> {
    if let Some(parent) = filename.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let lat = read_coordinate(reference, "lat")?;
    let lon = read_coordinate(reference, "lon")?;

    let mut dataset =
        netcdf::create_with(filename, netcdf::Options::NETCDF4 | netcdf::Options::CLASSIC)?;
    dataset.add_dimension("lat", config.lat_len)?;
    dataset.add_dimension("lon", config.lon_len)?;
    dataset.add_unlimited_dimension("time")?;

    {
        let mut lat_out = dataset.add_variable::<f32>("latitude", &["lat"])?;
        lat_out.put_attribute("units", units(reference, "lat")?.as_str())?;
        lat_out.put_values(&lat, ..)?;
    }
    {
        let mut lon_out = dataset.add_variable::<f32>("longitude", &["lon"])?;
        lon_out.put_attribute("units", units(reference, "lon")?.as_str())?;
        lon_out.put_values(&lon, ..)?;
    }
    {
        let mut time_out = dataset.add_variable::<f64>("time", &["time"])?;
        time_out.put_attribute("units", units(reference, "time")?.as_str())?;
        time_out.put_values(times, [0..times.len()])?;
    }
    {
        let (frames, rows, cols) = values.dim();
        let flat: Vec<f32> = values.iter().copied().collect();
        let mut pr_out = dataset.add_variable::<f32>("pr", &["time", "lat", "lon"])?;
        pr_out.put_attribute("units", units(reference, "pr")?.as_str())?;
        pr_out.put_values(&flat, [0..frames, 0..rows, 0..cols])?;
    }

    debug!(path = %filename.display(), frames = times.len(), "Exported NetCDF");
    Ok(())
}

fn variable<'f>(file: &'f netcdf::File, name: &str) -> PipelineResult<netcdf::Variable<'f>> {
    file.variable(name)
        .ok_or_else(|| PipelineError::MissingVariable(name.to_string()))
}

fn units(file: &netcdf::File, name: &str) -> PipelineResult<String> {
    let missing = || PipelineError::MissingAttribute {
        variable: name.to_string(),
        attribute: "units".to_string(),
    };
    match variable(file, name)?.attribute_value("units") {
        Some(value) => match value? {
            AttributeValue::Str(units) => Ok(units),
            _ => Err(missing()),
        },
        None => Err(missing()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::s;

    /// Write a small `pr` file on a 64x128 grid with `frames` time steps.
    pub(crate) fn write_source(path: &Path, frames: usize) {
        let mut file = netcdf::create(path).unwrap();
        file.add_dimension("time", frames).unwrap();
        file.add_dimension("lat", 64).unwrap();
        file.add_dimension("lon", 128).unwrap();

        let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
        time.put_attribute("units", "days since 1850-01-01").unwrap();
        let times: Vec<f64> = (0..frames).map(|t| 31.0 * t as f64).collect();
        time.put_values(&times, ..).unwrap();

        let mut lat = file.add_variable::<f32>("lat", &["lat"]).unwrap();
        lat.put_attribute("units", "degrees_north").unwrap();
        let lats: Vec<f32> = (0..64).map(|i| -87.86 + i as f32 * 2.79).collect();
        lat.put_values(&lats, ..).unwrap();

        let mut lon = file.add_variable::<f32>("lon", &["lon"]).unwrap();
        lon.put_attribute("units", "degrees_east").unwrap();
        let lons: Vec<f32> = (0..128).map(|i| i as f32 * 2.8125).collect();
        lon.put_values(&lons, ..).unwrap();

        let mut pr = file.add_variable::<f32>("pr", &["time", "lat", "lon"]).unwrap();
        pr.put_attribute("units", "kg m-2 s-1").unwrap();
        let values: Vec<f32> = (0..frames * 64 * 128)
            .map(|i| (i % 97) as f32 * 1e-6)
            .collect();
        pr.put_values(&values, ..).unwrap();
    }

    #[test]
    fn loads_series_with_matching_time_axis() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.nc");
        write_source(&source, 12);

        let file = netcdf::open(&source).unwrap();
        let series = load_series(&file).unwrap();

        assert_eq!(series.pr.dim(), (12, 64, 128));
        assert_eq!(series.time.len(), 12);
        assert_eq!(series.time[2], 62.0);
        assert_eq!(series.pr[[0, 0, 5]], 5.0 * 1e-6);
    }

    #[test]
    fn exported_file_copies_grid_and_units() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.nc");
        write_source(&source, 12);
        let reference = netcdf::open(&source).unwrap();
        let series = load_series(&reference).unwrap();

        let out = dir.path().join("outputs").join("dev_predictions.nc");
        let predictions = series.pr.slice(s![..5, .., ..]);
        export_netcdf(
            predictions,
            &reference,
            &out,
            &series.time[..5],
            &ExportConfig::new(),
        )
        .unwrap();

        let exported = netcdf::open(&out).unwrap();
        let pr = exported.variable("pr").unwrap();
        let shape: Vec<usize> = pr.dimensions().iter().map(|d| d.len()).collect();
        assert_eq!(shape, vec![5, 64, 128]);
        assert_eq!(units(&exported, "pr").unwrap(), "kg m-2 s-1");
        assert_eq!(units(&exported, "time").unwrap(), "days since 1850-01-01");

        assert_eq!(
            read_coordinate(&exported, "latitude").unwrap(),
            read_coordinate(&reference, "lat").unwrap()
        );
        assert_eq!(
            read_coordinate(&exported, "longitude").unwrap(),
            read_coordinate(&reference, "lon").unwrap()
        );

        let written: Vec<f32> = pr.get_values(..).unwrap();
        let expected: Vec<f32> = predictions.iter().copied().collect();
        assert_eq!(written, expected);
    }

    #[test]
    fn mismatched_grid_surfaces_library_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source.nc");
        write_source(&source, 4);
        let reference = netcdf::open(&source).unwrap();

        let wrong = Array3::<f32>::zeros((2, 80, 160));
        let result = export_netcdf(
            wrong.view(),
            &reference,
            &dir.path().join("bad.nc"),
            &[0.0, 1.0],
            &ExportConfig::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_variable_is_reported_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.nc");
        {
            let mut file = netcdf::create(&path).unwrap();
            file.add_dimension("time", 1).unwrap();
            let mut time = file.add_variable::<f64>("time", &["time"]).unwrap();
            time.put_values(&[0.0], ..).unwrap();
        }

        let file = netcdf::open(&path).unwrap();
        let err = load_series(&file).unwrap_err();
        assert!(matches!(err, PipelineError::MissingVariable(name) if name == "pr"));
    }
}
