//! Calibration files through to corrected frames.

use undistort_recorder::calibration::{self, CalibrationError};
use undistort_recorder::camera::{Frame, Resolution};

const BARREL_YAML: &str = "%YAML:1.0
---
CameraMatrix: !!opencv-matrix
   rows: 3
   cols: 3
   dt: d
   data: [ 60., 0., 32., 0., 60., 24., 0., 0., 1. ]
DistCoeffs: !!opencv-matrix
   rows: 1
   cols: 5
   dt: d
   data: [ -0.35, 0.12, 0., 0., 0. ]
";

fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_yaml_and_json_load_the_same_calibration() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = write_file(&dir, "cal.yml", BARREL_YAML);
    let json = write_file(
        &dir,
        "cal.json",
        r#"{
  "CameraMatrix": { "type_id": "opencv-matrix", "rows": 3, "cols": 3, "dt": "d",
                    "data": [60.0, 0.0, 32.0, 0.0, 60.0, 24.0, 0.0, 0.0, 1.0] },
  "DistCoeffs": { "type_id": "opencv-matrix", "rows": 1, "cols": 5, "dt": "d",
                  "data": [-0.35, 0.12, 0.0, 0.0, 0.0] }
}"#,
    );

    let from_yaml = calibration::load(&yaml).unwrap();
    let from_json = calibration::load(&json).unwrap();
    assert_eq!(from_yaml, from_json);
}

#[test]
fn test_json_content_in_yml_file_still_parses() {
    // JSON is a subset of YAML
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "cal.yml",
        r#"{"CameraMatrix": [[60, 0, 32], [0, 60, 24], [0, 0, 1]], "DistCoeffs": [0, 0, 0, 0, 0]}"#,
    );
    let cal = calibration::load(&path).unwrap();
    assert!(cal.dist_coeffs.is_zero());
}

#[test]
fn test_invalid_json_reports_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "cal.json", "{ not json");
    assert!(matches!(
        calibration::load(&path),
        Err(CalibrationError::Parse { format: "JSON", .. })
    ));
}

#[test]
fn test_barrel_correction_keeps_centre_and_size() {
    let dir = tempfile::tempdir().unwrap();
    let cal = calibration::load(&write_file(&dir, "cal.yml", BARREL_YAML)).unwrap();
    let res = Resolution::new(64, 48);

    let mut src = Frame::black(res);
    for (i, px) in src.data.chunks_mut(3).enumerate() {
        let x = (i % 64) as u8;
        px.copy_from_slice(&[x * 4, 100, 200]);
    }

    let map = cal.undistort_map(res, None).unwrap();
    let mut dst = Frame::black(res);
    map.remap(&src, &mut dst).unwrap();

    assert_eq!(dst.resolution(), res);
    assert_eq!(dst.pixel(32, 24), src.pixel(32, 24));
    // Same camera matrix crops: corners still sample the sensor
    assert_ne!(dst.pixel(0, 0), Some([0, 0, 0]));

    // Keeping every source pixel leaves black bays at the edge midpoints
    let full = cal.undistort_map(res, Some(1.0)).unwrap();
    full.remap(&src, &mut dst).unwrap();
    assert_eq!(dst.pixel(0, 24), Some([0, 0, 0]));
}

#[test]
fn test_alpha_zero_fills_every_pixel() {
    let dir = tempfile::tempdir().unwrap();
    let cal = calibration::load(&write_file(&dir, "cal.yml", BARREL_YAML)).unwrap();
    let res = Resolution::new(64, 48);

    let src = Frame::from_bgr(64, 48, vec![255; res.frame_len()]).unwrap();
    let map = cal.undistort_map(res, Some(0.0)).unwrap();
    let mut dst = Frame::black(res);
    map.remap(&src, &mut dst).unwrap();

    // Cropped to the valid region: no black border in the interior ring
    assert_eq!(dst.pixel(2, 2), Some([255, 255, 255]));
    assert_eq!(dst.pixel(61, 45), Some([255, 255, 255]));
}
