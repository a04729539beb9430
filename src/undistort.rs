//! Lens distortion correction.
//!
//! Pinhole camera with Brown-Conrady distortion: rational radial terms
//! (k1..k6), tangential terms (p1, p2) and thin-prism terms (s1..s4).
//! Correction is split in two steps the way it is done for video: an
//! [`UndistortMap`] is built once for the frame size, then every frame is
//! resampled through it with bilinear interpolation.

use serde::Serialize;

use crate::camera::{Frame, Resolution};

/// Row-major 3x3 matrix.
pub type Matrix3 = [[f64; 3]; 3];

/// Fixed-point iterations used when inverting the distortion model.
const UNDISTORT_ITERATIONS: usize = 5;

/// Grid density used to estimate the valid image region.
const RECT_GRID: usize = 9;

/// Distortion coefficients in OpenCV order:
/// `k1 k2 p1 p2 [k3 [k4 k5 k6 [s1 s2 s3 s4]]]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DistortionCoefficients {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
    pub s4: f64,
    /// How many coefficients the calibration supplied.
    pub count: usize,
}

impl DistortionCoefficients {
    /// Coefficient counts the model understands.
    pub const SUPPORTED_COUNTS: [usize; 4] = [4, 5, 8, 12];

    /// Build from a flat coefficient vector. Returns `None` for unsupported lengths.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        if !Self::SUPPORTED_COUNTS.contains(&values.len()) {
            return None;
        }
        let at = |i: usize| values.get(i).copied().unwrap_or(0.0);
        Some(Self {
            k1: at(0),
            k2: at(1),
            p1: at(2),
            p2: at(3),
            k3: at(4),
            k4: at(5),
            k5: at(6),
            k6: at(7),
            s1: at(8),
            s2: at(9),
            s3: at(10),
            s4: at(11),
            count: values.len(),
        })
    }

    /// No distortion at all (five zero coefficients).
    pub fn zero() -> Self {
        Self {
            count: 5,
            ..Self::default()
        }
    }

    /// Coefficients in OpenCV order, truncated to the supplied count.
    pub fn to_vec(&self) -> Vec<f64> {
        let all = [
            self.k1, self.k2, self.p1, self.p2, self.k3, self.k4, self.k5, self.k6, self.s1,
            self.s2, self.s3, self.s4,
        ];
        all[..self.count.min(all.len())].to_vec()
    }

    pub fn is_zero(&self) -> bool {
        self.to_vec().iter().all(|c| *c == 0.0)
    }

    /// Apply distortion to normalized image coordinates.
    pub fn distort_normalized(&self, xy: [f64; 2]) -> [f64; 2] {
        let [x, y] = xy;
        let x2 = x * x;
        let y2 = y * y;
        let r2 = x2 + y2;
        let r4 = r2 * r2;
        let xy2 = 2.0 * x * y;
        let radial = (1.0 + ((self.k3 * r2 + self.k2) * r2 + self.k1) * r2)
            / (1.0 + ((self.k6 * r2 + self.k5) * r2 + self.k4) * r2);
        [
            x * radial + self.p1 * xy2 + self.p2 * (r2 + 2.0 * x2) + self.s1 * r2 + self.s2 * r4,
            y * radial + self.p1 * (r2 + 2.0 * y2) + self.p2 * xy2 + self.s3 * r2 + self.s4 * r4,
        ]
    }

    /// Invert [`DistortionCoefficients::distort_normalized`] by fixed-point iteration.
    pub fn undistort_normalized(&self, distorted: [f64; 2]) -> [f64; 2] {
        let [x0, y0] = distorted;
        let (mut x, mut y) = (x0, y0);
        for _ in 0..UNDISTORT_ITERATIONS {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let icdist = (1.0 + ((self.k6 * r2 + self.k5) * r2 + self.k4) * r2)
                / (1.0 + ((self.k3 * r2 + self.k2) * r2 + self.k1) * r2);
            if icdist < 0.0 {
                return [x0, y0];
            }
            let dx = 2.0 * self.p1 * x * y
                + self.p2 * (r2 + 2.0 * x * x)
                + self.s1 * r2
                + self.s2 * r4;
            let dy = self.p1 * (r2 + 2.0 * y * y)
                + 2.0 * self.p2 * x * y
                + self.s3 * r2
                + self.s4 * r4;
            x = (x0 - dx) * icdist;
            y = (y0 - dy) * icdist;
        }
        [x, y]
    }
}

/// Errors from building or applying an undistortion map.
#[derive(Debug, thiserror::Error)]
pub enum UndistortError {
    /// The new camera matrix cannot be inverted
    #[error("Camera matrix is singular")]
    SingularMatrix,
    /// Frame does not have the size the map was built for
    #[error("Frame size {actual} does not match undistort map size {expected}")]
    SizeMismatch {
        expected: Resolution,
        actual: Resolution,
    },
    /// Pixel buffer is shorter or longer than its dimensions say
    #[error("Frame buffer holds {actual} bytes, expected {expected}")]
    BufferLength { expected: usize, actual: usize },
}

/// Invert a 3x3 matrix. Returns `None` when it is singular.
pub fn invert3(m: &Matrix3) -> Option<Matrix3> {
    let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
    if det.abs() < f64::EPSILON || !det.is_finite() {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ])
}

/// Axis-aligned rectangle in normalized coordinates.
#[derive(Debug, Clone, Copy)]
struct Rect {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Inner (all-valid) and outer (all-covering) rectangles of the undistorted image.
fn undistorted_rectangles(
    camera_matrix: &Matrix3,
    dist: &DistortionCoefficients,
    resolution: Resolution,
) -> (Rect, Rect) {
    let fx = camera_matrix[0][0];
    let fy = camera_matrix[1][1];
    let cx = camera_matrix[0][2];
    let cy = camera_matrix[1][2];
    let n = RECT_GRID;
    let (w, h) = (resolution.width as f64, resolution.height as f64);

    let (mut ox0, mut ox1, mut oy0, mut oy1) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
    let (mut ix0, mut ix1, mut iy0, mut iy1) = (f64::MIN, f64::MAX, f64::MIN, f64::MAX);

    for gy in 0..n {
        for gx in 0..n {
            let u = gx as f64 * w / (n - 1) as f64;
            let v = gy as f64 * h / (n - 1) as f64;
            let [x, y] = dist.undistort_normalized([(u - cx) / fx, (v - cy) / fy]);

            ox0 = ox0.min(x);
            ox1 = ox1.max(x);
            oy0 = oy0.min(y);
            oy1 = oy1.max(y);

            if gx == 0 {
                ix0 = ix0.max(x);
            }
            if gx == n - 1 {
                ix1 = ix1.min(x);
            }
            if gy == 0 {
                iy0 = iy0.max(y);
            }
            if gy == n - 1 {
                iy1 = iy1.min(y);
            }
        }
    }

    (
        Rect {
            x: ix0,
            y: iy0,
            width: ix1 - ix0,
            height: iy1 - iy0,
        },
        Rect {
            x: ox0,
            y: oy0,
            width: ox1 - ox0,
            height: oy1 - oy0,
        },
    )
}

/// Camera matrix for the corrected image, scaled by the free parameter `alpha`.
///
/// `alpha = 0` zooms in until every output pixel is valid; `alpha = 1` keeps
/// every source pixel in view (with black regions at the border). Values in
/// between interpolate.
pub fn optimal_new_camera_matrix(
    camera_matrix: &Matrix3,
    dist: &DistortionCoefficients,
    resolution: Resolution,
    alpha: f64,
) -> Matrix3 {
    let alpha = alpha.clamp(0.0, 1.0);
    let (inner, outer) = undistorted_rectangles(camera_matrix, dist, resolution);
    let w = resolution.width as f64 - 1.0;
    let h = resolution.height as f64 - 1.0;

    let fx0 = w / inner.width;
    let fy0 = h / inner.height;
    let cx0 = -fx0 * inner.x;
    let cy0 = -fy0 * inner.y;

    let fx1 = w / outer.width;
    let fy1 = h / outer.height;
    let cx1 = -fx1 * outer.x;
    let cy1 = -fy1 * outer.y;

    let mix = |a: f64, b: f64| a * (1.0 - alpha) + b * alpha;
    [
        [mix(fx0, fx1), 0.0, mix(cx0, cx1)],
        [0.0, mix(fy0, fy1), mix(cy0, cy1)],
        [0.0, 0.0, 1.0],
    ]
}

/// Per-pixel source coordinates for a fixed frame size.
#[derive(Debug, Clone)]
pub struct UndistortMap {
    resolution: Resolution,
    /// Source (x, y) for every destination pixel, row-major
    coords: Vec<[f32; 2]>,
}

impl UndistortMap {
    /// Build the map for `resolution`.
    ///
    /// For each destination pixel the inverse of `new_camera_matrix` gives a
    /// normalized ray, the distortion model bends it, and the original camera
    /// matrix projects it back into the source frame.
    pub fn new(
        camera_matrix: &Matrix3,
        dist: &DistortionCoefficients,
        resolution: Resolution,
        new_camera_matrix: &Matrix3,
    ) -> Result<Self, UndistortError> {
        let inv = invert3(new_camera_matrix).ok_or(UndistortError::SingularMatrix)?;
        let fx = camera_matrix[0][0];
        let fy = camera_matrix[1][1];
        let cx = camera_matrix[0][2];
        let cy = camera_matrix[1][2];

        let mut coords = Vec::with_capacity(resolution.pixel_count());
        for v in 0..resolution.height {
            let v = v as f64;
            for u in 0..resolution.width {
                let u = u as f64;
                let xw = inv[0][0] * u + inv[0][1] * v + inv[0][2];
                let yw = inv[1][0] * u + inv[1][1] * v + inv[1][2];
                let w = inv[2][0] * u + inv[2][1] * v + inv[2][2];
                let w = if w == 0.0 { f64::EPSILON } else { w };
                let [xd, yd] = dist.distort_normalized([xw / w, yw / w]);
                coords.push([(fx * xd + cx) as f32, (fy * yd + cy) as f32]);
            }
        }

        Ok(Self { resolution, coords })
    }

    /// Source coordinate sampled for destination pixel (x, y).
    pub fn source_coord(&self, x: u32, y: u32) -> Option<[f32; 2]> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        self.coords
            .get(y as usize * self.resolution.width as usize + x as usize)
            .copied()
    }

    /// Resample `src` into `dst` through the map.
    ///
    /// Bilinear interpolation; samples outside the source read as black.
    pub fn remap(&self, src: &Frame, dst: &mut Frame) -> Result<(), UndistortError> {
        for frame in [src.resolution(), dst.resolution()] {
            if frame != self.resolution {
                return Err(UndistortError::SizeMismatch {
                    expected: self.resolution,
                    actual: frame,
                });
            }
        }
        let expected = self.resolution.frame_len();
        for len in [src.data.len(), dst.data.len()] {
            if len != expected {
                return Err(UndistortError::BufferLength {
                    expected,
                    actual: len,
                });
            }
        }

        let width = self.resolution.width as i64;
        let height = self.resolution.height as i64;
        let data = &src.data;
        let sample = |x: i64, y: i64, c: usize| -> f32 {
            if x < 0 || y < 0 || x >= width || y >= height {
                0.0
            } else {
                data[((y * width + x) * 3) as usize + c] as f32
            }
        };

        for (i, [sx, sy]) in self.coords.iter().copied().enumerate() {
            let x0 = sx.floor();
            let y0 = sy.floor();
            let ax = sx - x0;
            let ay = sy - y0;
            let (xi, yi) = (x0 as i64, y0 as i64);
            let out = &mut dst.data[i * 3..i * 3 + 3];
            for (c, px) in out.iter_mut().enumerate() {
                let top = sample(xi, yi, c) * (1.0 - ax) + sample(xi + 1, yi, c) * ax;
                let bottom = sample(xi, yi + 1, c) * (1.0 - ax) + sample(xi + 1, yi + 1, c) * ax;
                let value = top * (1.0 - ay) + bottom * ay;
                *px = value.round().clamp(0.0, 255.0) as u8;
            }
        }
        dst.timestamp = src.timestamp;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vga_camera() -> Matrix3 {
        [[600.0, 0.0, 320.0], [0.0, 600.0, 240.0], [0.0, 0.0, 1.0]]
    }

    fn gradient(resolution: Resolution) -> Frame {
        let mut frame = Frame::black(resolution);
        for y in 0..resolution.height {
            for x in 0..resolution.width {
                let i = ((y * resolution.width + x) * 3) as usize;
                frame.data[i] = (x % 256) as u8;
                frame.data[i + 1] = (y % 256) as u8;
                frame.data[i + 2] = ((x + y) % 256) as u8;
            }
        }
        frame
    }

    #[test]
    fn test_from_slice_supported_counts() {
        assert!(DistortionCoefficients::from_slice(&[0.1, 0.2, 0.0, 0.0]).is_some());
        assert!(DistortionCoefficients::from_slice(&[0.0; 5]).is_some());
        assert!(DistortionCoefficients::from_slice(&[0.0; 8]).is_some());
        assert!(DistortionCoefficients::from_slice(&[0.0; 12]).is_some());
        assert!(DistortionCoefficients::from_slice(&[0.0; 3]).is_none());
        assert!(DistortionCoefficients::from_slice(&[0.0; 14]).is_none());
        assert!(DistortionCoefficients::from_slice(&[]).is_none());
    }

    #[test]
    fn test_from_slice_order() {
        let d = DistortionCoefficients::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!((d.k1, d.k2, d.p1, d.p2, d.k3), (1.0, 2.0, 3.0, 4.0, 5.0));
        assert_eq!(d.to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(!d.is_zero());
        assert!(DistortionCoefficients::zero().is_zero());
    }

    #[test]
    fn test_undistort_inverts_distort() {
        let d = DistortionCoefficients::from_slice(&[-0.28, 0.07, 0.001, -0.0005, 0.0]).unwrap();
        let p = [0.2, -0.15];
        let back = d.undistort_normalized(d.distort_normalized(p));
        assert!((back[0] - p[0]).abs() < 1e-4, "{:?}", back);
        assert!((back[1] - p[1]).abs() < 1e-4, "{:?}", back);
    }

    #[test]
    fn test_invert3() {
        let k = vga_camera();
        let inv = invert3(&k).unwrap();
        assert!((inv[0][0] - 1.0 / 600.0).abs() < 1e-12);
        assert!((inv[0][2] + 320.0 / 600.0).abs() < 1e-12);
        assert!(invert3(&[[0.0; 3]; 3]).is_none());
    }

    #[test]
    fn test_zero_distortion_is_pixel_identical() {
        let res = Resolution::new(64, 48);
        let k = [[50.0, 0.0, 31.5], [0.0, 50.0, 23.5], [0.0, 0.0, 1.0]];
        let map = UndistortMap::new(&k, &DistortionCoefficients::zero(), res, &k).unwrap();
        let src = gradient(res);
        let mut dst = Frame::black(res);
        map.remap(&src, &mut dst).unwrap();
        assert_eq!(src.data, dst.data);
    }

    #[test]
    fn test_principal_point_is_fixed() {
        let res = Resolution::VGA;
        let k = vga_camera();
        let d = DistortionCoefficients::from_slice(&[-0.3, 0.1, 0.0, 0.0, 0.0]).unwrap();
        let map = UndistortMap::new(&k, &d, res, &k).unwrap();
        let [sx, sy] = map.source_coord(320, 240).unwrap();
        assert!((sx - 320.0).abs() < 1e-3);
        assert!((sy - 240.0).abs() < 1e-3);
    }

    #[test]
    fn test_pincushion_corners_fall_outside_and_turn_black() {
        let res = Resolution::new(64, 48);
        let k = [[40.0, 0.0, 32.0], [0.0, 40.0, 24.0], [0.0, 0.0, 1.0]];
        let d = DistortionCoefficients::from_slice(&[0.8, 0.0, 0.0, 0.0]).unwrap();
        let map = UndistortMap::new(&k, &d, res, &k).unwrap();

        let [sx, sy] = map.source_coord(0, 0).unwrap();
        assert!(sx < -1.0 && sy < -1.0);

        let src = Frame::from_bgr(res.width, res.height, vec![200; res.frame_len()]).unwrap();
        let mut dst = Frame::black(res);
        map.remap(&src, &mut dst).unwrap();
        assert_eq!(dst.pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(dst.pixel(32, 24), Some([200, 200, 200]));
    }

    #[test]
    fn test_remap_rejects_wrong_size() {
        let k = vga_camera();
        let map =
            UndistortMap::new(&k, &DistortionCoefficients::zero(), Resolution::new(8, 8), &k)
                .unwrap();
        let src = Frame::black(Resolution::new(4, 4));
        let mut dst = Frame::black(Resolution::new(8, 8));
        match map.remap(&src, &mut dst) {
            Err(UndistortError::SizeMismatch { expected, actual }) => {
                assert_eq!(expected, Resolution::new(8, 8));
                assert_eq!(actual, Resolution::new(4, 4));
            }
            other => panic!("Expected SizeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_remap_rejects_short_buffer() {
        let k = vga_camera();
        let res = Resolution::new(8, 8);
        let map = UndistortMap::new(&k, &DistortionCoefficients::zero(), res, &k).unwrap();
        let mut src = Frame::black(res);
        src.data.truncate(10);
        let mut dst = Frame::black(res);
        match map.remap(&src, &mut dst) {
            Err(UndistortError::BufferLength { expected, actual }) => {
                assert_eq!(expected, res.frame_len());
                assert_eq!(actual, 10);
            }
            other => panic!("Expected BufferLength, got {:?}", other),
        }
    }

    #[test]
    fn test_singular_new_matrix_is_rejected() {
        let k = vga_camera();
        let result = UndistortMap::new(
            &k,
            &DistortionCoefficients::zero(),
            Resolution::new(4, 4),
            &[[0.0; 3]; 3],
        );
        assert!(matches!(result, Err(UndistortError::SingularMatrix)));
    }

    #[test]
    fn test_optimal_matrix_without_distortion_ignores_alpha() {
        let k = vga_camera();
        let d = DistortionCoefficients::zero();
        let a0 = optimal_new_camera_matrix(&k, &d, Resolution::VGA, 0.0);
        let a1 = optimal_new_camera_matrix(&k, &d, Resolution::VGA, 1.0);
        for r in 0..3 {
            for c in 0..3 {
                assert!((a0[r][c] - a1[r][c]).abs() < 1e-9);
            }
        }
        // Focal length shrinks by (w - 1) / w when mapping pixel centres
        assert!((a0[0][0] - 600.0 * 639.0 / 640.0).abs() < 1e-6);
    }

    #[test]
    fn test_optimal_matrix_barrel_alpha_orders_focal_length() {
        let k = vga_camera();
        let d = DistortionCoefficients::from_slice(&[-0.3, 0.1, 0.0, 0.0, 0.0]).unwrap();
        let crop = optimal_new_camera_matrix(&k, &d, Resolution::VGA, 0.0);
        let full = optimal_new_camera_matrix(&k, &d, Resolution::VGA, 1.0);
        // Keeping every source pixel needs a wider view, i.e. a shorter focal length
        assert!(full[0][0] < crop[0][0]);
        assert!(full[1][1] < crop[1][1]);
    }
}
