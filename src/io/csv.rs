/*!
# CSV export of posterior samples and prediction summaries

Enable via the `csv` feature.
*/

use ndarray::{Array3, Axis};
use std::error::Error;
use std::fs::File;

use csv::Writer;

use crate::error::PosteriorError;
use crate::posterior::PredictionSummary;

/**
Saves posterior samples of shape **lens × sample × parameter** as a CSV file.

The header row holds `"lens"`, `"sample"` and then the parameter names in `y_cols`; every
following row is one draw of one lens.

# Examples

```rust
use bnn_posterior::io::csv::save_samples_csv;
use ndarray::arr3;

let data = arr3(&[[[1.2, 2.0], [1.3, 2.1]]]);
let y_cols = vec!["theta_E".to_string(), "gamma".to_string()];

save_samples_csv(&data, &y_cols, "/tmp/samples.csv").expect("Expecting saving data to succeed");
```
*/
pub fn save_samples_csv<T: std::fmt::Display>(
    data: &Array3<T>,
    y_cols: &[String],
    filename: &str,
) -> Result<(), Box<dyn Error>> {
    if data.shape()[2] != y_cols.len() {
        return Err(PosteriorError::SampleShape {
            expected: y_cols.len(),
            found: data.shape().to_vec(),
        }
        .into());
    }
    let mut wtr = Writer::from_writer(File::create(filename)?);

    let mut header: Vec<String> = vec!["lens".to_string(), "sample".to_string()];
    header.extend(y_cols.iter().cloned());
    wtr.write_record(&header)?;

    for (lens_idx, lens) in data.axis_iter(Axis(0)).enumerate() {
        for (sample_idx, sample) in lens.axis_iter(Axis(0)).enumerate() {
            let mut row = vec![lens_idx.to_string(), sample_idx.to_string()];
            row.extend(sample.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/**
Saves a [`PredictionSummary`] with one row per lens.

Columns are `"lens"`, the parameter names, the same names suffixed with `_sig` holding the
marginal standard deviations and, for mixture posteriors, `"w2"`.
*/
pub fn save_prediction_csv(
    summary: &PredictionSummary,
    y_cols: &[String],
    filename: &str,
) -> Result<(), Box<dyn Error>> {
    if summary.mu.ncols() != y_cols.len() {
        return Err(PosteriorError::SampleShape {
            expected: y_cols.len(),
            found: summary.mu.shape().to_vec(),
        }
        .into());
    }
    let mut wtr = Writer::from_writer(File::create(filename)?);

    let mut header: Vec<String> = vec!["lens".to_string()];
    header.extend(y_cols.iter().cloned());
    header.extend(y_cols.iter().map(|col| format!("{col}_sig")));
    if summary.w2.is_some() {
        header.push("w2".to_string());
    }
    wtr.write_record(&header)?;

    for (lens, (mu, std)) in summary.mu.rows().into_iter().zip(summary.std.rows()).enumerate() {
        let mut row = vec![lens.to_string()];
        row.extend(mu.iter().map(|v| v.to_string()));
        row.extend(std.iter().map(|v| v.to_string()));
        if let Some(w2) = &summary.w2 {
            row.push(w2[lens].to_string());
        }
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, arr3};
    use std::fs;
    use tempfile::NamedTempFile;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_save_samples_csv_multi_lens() {
        let data = arr3(&[[[1.5, 2.0], [3.0, 4.0]], [[10.0, 20.0], [30.0, 40.25]]]);
        let file = NamedTempFile::new().expect("Could not create temp file");
        let filename = file.path().to_str().unwrap();

        let result = save_samples_csv(&data, &cols(&["theta_E", "gamma"]), filename);
        assert!(result.is_ok());

        let contents = fs::read_to_string(filename).unwrap();
        let expected = "\
lens,sample,theta_E,gamma
0,0,1.5,2
0,1,3,4
1,0,10,20
1,1,30,40.25";
        assert_eq!(contents.trim(), expected);
    }

    #[test]
    fn test_save_samples_csv_rejects_wrong_column_count() {
        let data = arr3(&[[[1.0, 2.0]]]);
        let file = NamedTempFile::new().expect("Could not create temp file");
        let filename = file.path().to_str().unwrap();

        let result = save_samples_csv(&data, &cols(&["theta_E"]), filename);
        assert!(result.is_err());
    }

    #[test]
    fn test_save_prediction_csv_with_weights() {
        let summary = PredictionSummary {
            mu: arr2(&[[1.0, 2.0], [3.0, 4.0]]),
            std: arr2(&[[0.5, 0.25], [0.125, 1.0]]),
            w2: Some(arr1(&[0.25, 0.5])),
        };
        let file = NamedTempFile::new().expect("Could not create temp file");
        let filename = file.path().to_str().unwrap();

        save_prediction_csv(&summary, &cols(&["a", "b"]), filename).unwrap();
        let contents = fs::read_to_string(filename).unwrap();
        let expected = "\
lens,a,b,a_sig,b_sig,w2
0,1,2,0.5,0.25,0.25
1,3,4,0.125,1,0.5";
        assert_eq!(contents.trim(), expected);
    }

    #[test]
    fn test_save_prediction_csv_without_weights() {
        let summary = PredictionSummary {
            mu: arr2(&[[70.0]]),
            std: arr2(&[[3.5]]),
            w2: None,
        };
        let file = NamedTempFile::new().expect("Could not create temp file");
        let filename = file.path().to_str().unwrap();

        save_prediction_csv(&summary, &cols(&["H0"]), filename).unwrap();
        let contents = fs::read_to_string(filename).unwrap();
        assert_eq!(contents.trim(), "lens,H0,H0_sig\n0,70,3.5");
    }
}
