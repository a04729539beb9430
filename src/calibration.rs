//! Camera calibration loading.
//!
//! Reads the intrinsic matrix and distortion coefficients from an OpenCV
//! FileStorage document. Both the YAML flavour (`%YAML:1.0` header,
//! `!!opencv-matrix` nodes) and the JSON flavour (`"type_id": "opencv-matrix"`)
//! are understood, as are plain flat or nested number sequences.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::camera::Resolution;
use crate::undistort::{
    optimal_new_camera_matrix, DistortionCoefficients, Matrix3, UndistortError, UndistortMap,
};

/// Key holding the 3x3 intrinsic matrix.
pub const CAMERA_MATRIX_KEY: &str = "CameraMatrix";

/// Key holding the distortion coefficient vector.
pub const DIST_COEFFS_KEY: &str = "DistCoeffs";

/// Default calibration file, relative to the working directory.
pub const DEFAULT_CALIBRATION_FILE: &str = "calibration.yml";

/// Errors that can occur while loading calibration data.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    /// The file could not be read
    #[error("Cannot open calibration file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file is not a valid document
    #[error("Invalid calibration {format}: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
    /// A required entry is absent or holds no values
    #[error("Calibration entry {key} is missing or empty")]
    MissingEntry { key: &'static str },
    /// Declared dimensions disagree with the data
    #[error("Calibration entry {key} declares {rows}x{cols} but holds {len} values")]
    ShapeMismatch {
        key: &'static str,
        rows: usize,
        cols: usize,
        len: usize,
    },
    /// Dimensions are consistent but unusable
    #[error("Calibration entry {key} is invalid: {message}")]
    InvalidShape { key: &'static str, message: String },
}

/// Intrinsic matrix and distortion coefficients of one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationData {
    pub camera_matrix: Matrix3,
    pub dist_coeffs: DistortionCoefficients,
}

impl CalibrationData {
    pub fn new(camera_matrix: Matrix3, dist_coeffs: DistortionCoefficients) -> Self {
        Self {
            camera_matrix,
            dist_coeffs,
        }
    }

    /// Ideal pinhole camera without distortion.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self::new(
            [[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]],
            DistortionCoefficients::zero(),
        )
    }

    /// Camera matrix for the corrected image.
    ///
    /// Without `alpha` the original matrix is reused, which is what a plain
    /// undistort does. With `alpha` the matrix is rescaled so that `0` keeps
    /// only valid pixels and `1` keeps every source pixel.
    pub fn new_camera_matrix(&self, resolution: Resolution, alpha: Option<f64>) -> Matrix3 {
        match alpha {
            Some(alpha) => optimal_new_camera_matrix(
                &self.camera_matrix,
                &self.dist_coeffs,
                resolution,
                alpha,
            ),
            None => self.camera_matrix,
        }
    }

    /// Precompute the undistortion map for frames of `resolution`.
    pub fn undistort_map(
        &self,
        resolution: Resolution,
        alpha: Option<f64>,
    ) -> Result<UndistortMap, UndistortError> {
        let new_camera_matrix = self.new_camera_matrix(resolution, alpha);
        UndistortMap::new(
            &self.camera_matrix,
            &self.dist_coeffs,
            resolution,
            &new_camera_matrix,
        )
    }
}

impl fmt::Display for CalibrationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", CAMERA_MATRIX_KEY)?;
        for row in &self.camera_matrix {
            writeln!(f, "  [{:>12.4} {:>12.4} {:>12.4}]", row[0], row[1], row[2])?;
        }
        let coeffs: Vec<String> = self
            .dist_coeffs
            .to_vec()
            .iter()
            .map(|c| format!("{:.6}", c))
            .collect();
        write!(f, "{}: [{}]", DIST_COEFFS_KEY, coeffs.join(", "))
    }
}

/// A matrix node as written by OpenCV, or a plain sequence.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MatrixNode {
    Mat {
        rows: usize,
        cols: usize,
        data: Vec<f64>,
    },
    Nested(Vec<Vec<f64>>),
    Flat(Vec<f64>),
}

/// Matrix with checked dimensions.
struct RawMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl MatrixNode {
    fn into_raw(self, key: &'static str) -> Result<RawMatrix, CalibrationError> {
        let raw = match self {
            MatrixNode::Mat { rows, cols, data } => {
                if rows.checked_mul(cols) != Some(data.len()) {
                    return Err(CalibrationError::ShapeMismatch {
                        key,
                        rows,
                        cols,
                        len: data.len(),
                    });
                }
                RawMatrix { rows, cols, data }
            }
            MatrixNode::Nested(rows) => {
                let cols = rows.first().map_or(0, Vec::len);
                if rows.iter().any(|r| r.len() != cols) {
                    return Err(CalibrationError::InvalidShape {
                        key,
                        message: "rows have different lengths".to_string(),
                    });
                }
                RawMatrix {
                    rows: rows.len(),
                    cols,
                    data: rows.into_iter().flatten().collect(),
                }
            }
            MatrixNode::Flat(data) => RawMatrix {
                rows: 1,
                cols: data.len(),
                data,
            },
        };

        if raw.data.is_empty() {
            return Err(CalibrationError::MissingEntry { key });
        }
        if raw.data.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::InvalidShape {
                key,
                message: "contains non-finite values".to_string(),
            });
        }
        Ok(raw)
    }
}

#[derive(Debug, Deserialize)]
struct CalibrationDocument {
    #[serde(rename = "CameraMatrix", alias = "camera_matrix")]
    camera_matrix: Option<MatrixNode>,
    #[serde(rename = "DistCoeffs", alias = "dist_coeffs")]
    dist_coeffs: Option<MatrixNode>,
}

impl CalibrationDocument {
    fn into_calibration(self) -> Result<CalibrationData, CalibrationError> {
        let k = self
            .camera_matrix
            .ok_or(CalibrationError::MissingEntry {
                key: CAMERA_MATRIX_KEY,
            })?
            .into_raw(CAMERA_MATRIX_KEY)?;
        let d = self
            .dist_coeffs
            .ok_or(CalibrationError::MissingEntry {
                key: DIST_COEFFS_KEY,
            })?
            .into_raw(DIST_COEFFS_KEY)?;

        let is_flat_3x3 = k.rows * k.cols == 9 && (k.rows == 1 || k.cols == 1);
        if !(k.rows == 3 && k.cols == 3) && !is_flat_3x3 {
            return Err(CalibrationError::InvalidShape {
                key: CAMERA_MATRIX_KEY,
                message: format!("expected 3x3, got {}x{}", k.rows, k.cols),
            });
        }
        let mut camera_matrix = [[0.0; 3]; 3];
        for (i, value) in k.data.iter().enumerate() {
            camera_matrix[i / 3][i % 3] = *value;
        }
        if camera_matrix[0][0] == 0.0 || camera_matrix[1][1] == 0.0 {
            return Err(CalibrationError::InvalidShape {
                key: CAMERA_MATRIX_KEY,
                message: "focal length is zero".to_string(),
            });
        }

        if d.rows != 1 && d.cols != 1 {
            return Err(CalibrationError::InvalidShape {
                key: DIST_COEFFS_KEY,
                message: format!("expected a vector, got {}x{}", d.rows, d.cols),
            });
        }
        let dist_coeffs = DistortionCoefficients::from_slice(&d.data).ok_or_else(|| {
            CalibrationError::InvalidShape {
                key: DIST_COEFFS_KEY,
                message: format!(
                    "expected 4, 5, 8 or 12 coefficients, got {}",
                    d.data.len()
                ),
            }
        })?;

        Ok(CalibrationData::new(camera_matrix, dist_coeffs))
    }
}

/// Load calibration from `path`.
///
/// Files ending in `.json` are read as JSON, everything else as YAML.
pub fn load(path: &Path) -> Result<CalibrationData, CalibrationError> {
    let text = fs::read_to_string(path).map_err(|source| CalibrationError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let calibration = if is_json {
        parse_json(&text)?
    } else {
        parse_yaml(&text)?
    };

    log::info!(
        "Loaded calibration from {} ({} distortion coefficients)",
        path.display(),
        calibration.dist_coeffs.count
    );
    Ok(calibration)
}

/// Parse an OpenCV FileStorage YAML document.
pub fn parse_yaml(text: &str) -> Result<CalibrationData, CalibrationError> {
    let cleaned = strip_opencv_yaml(text);
    let doc: CalibrationDocument =
        serde_yaml::from_str(&cleaned).map_err(|e| CalibrationError::Parse {
            format: "YAML",
            message: e.to_string(),
        })?;
    doc.into_calibration()
}

/// Parse an OpenCV FileStorage JSON document.
pub fn parse_json(text: &str) -> Result<CalibrationData, CalibrationError> {
    let doc: CalibrationDocument =
        serde_json::from_str(text).map_err(|e| CalibrationError::Parse {
            format: "JSON",
            message: e.to_string(),
        })?;
    doc.into_calibration()
}

/// Drop the `%YAML:1.0` directive and `!!opencv-matrix` tags, which are not
/// standard YAML.
fn strip_opencv_yaml(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with('%'))
        .map(|line| line.replace("!!opencv-matrix", ""))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPENCV_YAML: &str = "%YAML:1.0
---
CameraMatrix: !!opencv-matrix
   rows: 3
   cols: 3
   dt: d
   data: [ 6.0138e+02, 0., 3.1950e+02, 0., 6.0138e+02, 2.3950e+02, 0.,
       0., 1. ]
DistCoeffs: !!opencv-matrix
   rows: 1
   cols: 5
   dt: d
   data: [ -2.8e-01, 7.5e-02, 1.0e-03, -5.0e-04, 0. ]
";

    #[test]
    fn test_parse_opencv_yaml() {
        let cal = parse_yaml(OPENCV_YAML).unwrap();
        assert_eq!(cal.camera_matrix[0][0], 601.38);
        assert_eq!(cal.camera_matrix[0][2], 319.5);
        assert_eq!(cal.camera_matrix[1][2], 239.5);
        assert_eq!(cal.camera_matrix[2][2], 1.0);
        assert_eq!(cal.dist_coeffs.count, 5);
        assert_eq!(cal.dist_coeffs.k1, -0.28);
        assert_eq!(cal.dist_coeffs.p2, -0.0005);
    }

    #[test]
    fn test_overflowing_shape_is_mismatch() {
        let yaml = "%YAML:1.0
---
CameraMatrix: !!opencv-matrix
   rows: 18446744073709551615
   cols: 2
   dt: d
   data: [ 1., 0. ]
DistCoeffs: [ 0., 0., 0., 0., 0. ]
";
        match parse_yaml(yaml) {
            Err(CalibrationError::ShapeMismatch { key, cols, len, .. }) => {
                assert_eq!(key, CAMERA_MATRIX_KEY);
                assert_eq!(cols, 2);
                assert_eq!(len, 2);
            }
            other => panic!("Expected ShapeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_opencv_json() {
        let json = r#"{
            "CameraMatrix": {
                "type_id": "opencv-matrix",
                "rows": 3, "cols": 3, "dt": "d",
                "data": [500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0]
            },
            "DistCoeffs": {
                "type_id": "opencv-matrix",
                "rows": 8, "cols": 1, "dt": "d",
                "data": [0.1, 0.01, 0.0, 0.0, 0.001, 0.0, 0.0, 0.0]
            }
        }"#;
        let cal = parse_json(json).unwrap();
        assert_eq!(cal.camera_matrix[1][1], 500.0);
        assert_eq!(cal.dist_coeffs.count, 8);
        assert_eq!(cal.dist_coeffs.k3, 0.001);
    }

    #[test]
    fn test_parse_plain_sequences() {
        let yaml = "camera_matrix:\n  - [400, 0, 200]\n  - [0, 400, 150]\n  - [0, 0, 1]\ndist_coeffs: [0.0, 0.0, 0.0, 0.0]\n";
        let cal = parse_yaml(yaml).unwrap();
        assert_eq!(cal.camera_matrix[1][2], 150.0);
        assert_eq!(cal.dist_coeffs.count, 4);
        assert!(cal.dist_coeffs.is_zero());
    }

    #[test]
    fn test_missing_entry() {
        let yaml = "CameraMatrix: [1, 0, 0, 0, 1, 0, 0, 0, 1]\n";
        match parse_yaml(yaml) {
            Err(CalibrationError::MissingEntry { key }) => assert_eq!(key, DIST_COEFFS_KEY),
            other => panic!("Expected MissingEntry, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_entry() {
        let yaml = "CameraMatrix: [1, 0, 0, 0, 1, 0, 0, 0, 1]\nDistCoeffs: []\n";
        assert!(matches!(
            parse_yaml(yaml),
            Err(CalibrationError::MissingEntry { key: DIST_COEFFS_KEY })
        ));
    }

    #[test]
    fn test_shape_mismatch() {
        let yaml = "CameraMatrix:\n  rows: 3\n  cols: 3\n  data: [1, 0, 0, 0, 1, 0]\nDistCoeffs: [0, 0, 0, 0, 0]\n";
        match parse_yaml(yaml) {
            Err(CalibrationError::ShapeMismatch {
                key, rows, cols, len,
            }) => {
                assert_eq!(key, CAMERA_MATRIX_KEY);
                assert_eq!((rows, cols, len), (3, 3, 6));
            }
            other => panic!("Expected ShapeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_shapes() {
        let not_3x3 = "CameraMatrix:\n  rows: 2\n  cols: 2\n  data: [1, 0, 0, 1]\nDistCoeffs: [0, 0, 0, 0, 0]\n";
        assert!(matches!(
            parse_yaml(not_3x3),
            Err(CalibrationError::InvalidShape { key: CAMERA_MATRIX_KEY, .. })
        ));

        let six_coeffs = "CameraMatrix: [1, 0, 0, 0, 1, 0, 0, 0, 1]\nDistCoeffs: [0, 0, 0, 0, 0, 0]\n";
        assert!(matches!(
            parse_yaml(six_coeffs),
            Err(CalibrationError::InvalidShape { key: DIST_COEFFS_KEY, .. })
        ));
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            parse_yaml("CameraMatrix: [1, 2"),
            Err(CalibrationError::Parse { format: "YAML", .. })
        ));
        assert!(matches!(
            parse_json("{"),
            Err(CalibrationError::Parse { format: "JSON", .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.yml");
        fs::write(&path, OPENCV_YAML).unwrap();
        let cal = load(&path).unwrap();
        assert_eq!(cal.dist_coeffs.count, 5);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.yml");
        match load(&path) {
            Err(CalibrationError::Open { path: p, .. }) => assert_eq!(p, path),
            other => panic!("Expected Open error, got {:?}", other),
        }
    }

    #[test]
    fn test_new_camera_matrix_defaults_to_original() {
        let cal = CalibrationData::pinhole(500.0, 500.0, 320.0, 240.0);
        assert_eq!(cal.new_camera_matrix(Resolution::VGA, None), cal.camera_matrix);
        let scaled = cal.new_camera_matrix(Resolution::VGA, Some(1.0));
        assert!(scaled[0][0] < 500.0);
    }

    #[test]
    fn test_display_lists_both_entries() {
        let cal = parse_yaml(OPENCV_YAML).unwrap();
        let text = cal.to_string();
        assert!(text.starts_with("CameraMatrix:"));
        assert!(text.contains("DistCoeffs: [-0.280000, 0.075000, 0.001000, -0.000500, 0.000000]"));
    }
}
