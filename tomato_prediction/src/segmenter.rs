use crate::{config::DetectionConfig, detection::Region};
use opencv::{
    core::{self, Mat, Point, Scalar, Size, Vector},
    imgproc,
    prelude::*,
};

/// HSV bounds (OpenCV 8-bit hue scale, 0..=180) for a single color band.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HueRange {
    pub lower: [f64; 3],
    pub upper: [f64; 3],
}

impl HueRange {
    const fn new(lower: [f64; 3], upper: [f64; 3]) -> Self {
        Self { lower, upper }
    }

    fn mask(&self, hsv: &Mat) -> opencv::Result<Mat> {
        let lower = Scalar::new(self.lower[0], self.lower[1], self.lower[2], 0.0);
        let upper = Scalar::new(self.upper[0], self.upper[1], self.upper[2], 0.0);
        let mut mask = Mat::default();
        core::in_range(hsv, &lower, &upper, &mut mask)?;
        Ok(mask)
    }
}

// Red wraps around the hue circle, so it needs two bands.
pub(crate) const RED_LOW: HueRange =
    HueRange::new([0.0, 120.0, 70.0], [10.0, 255.0, 255.0]);
pub(crate) const RED_HIGH: HueRange =
    HueRange::new([170.0, 120.0, 70.0], [180.0, 255.0, 255.0]);
pub(crate) const GREEN: HueRange =
    HueRange::new([35.0, 50.0, 50.0], [90.0, 255.0, 255.0]);

#[derive(Debug, Clone)]
pub struct Segmenter {
    ranges: Vec<HueRange>,
    kernel_size: i32,
    min_region_size: i32,
}

impl Segmenter {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            ranges: vec![RED_LOW, RED_HIGH, GREEN],
            kernel_size: config.kernel_size,
            min_region_size: config.min_region_size,
        }
    }

    /// Binary mask of every pixel inside one of the configured bands, cleaned
    /// by an opening followed by a dilation.
    pub fn mask(&self, frame: &Mat) -> opencv::Result<Mat> {
        let mut hsv = Mat::default();
        imgproc::cvt_color_def(frame, &mut hsv, imgproc::COLOR_BGR2HSV)?;

        let mut combined =
            Mat::new_rows_cols_with_default(hsv.rows(), hsv.cols(), core::CV_8UC1, Scalar::all(0.0))?;
        for range in &self.ranges {
            let band = range.mask(&hsv)?;
            let mut merged = Mat::default();
            core::bitwise_or_def(&combined, &band, &mut merged)?;
            combined = merged;
        }

        let kernel = imgproc::get_structuring_element(
            imgproc::MORPH_RECT,
            Size::new(self.kernel_size, self.kernel_size),
            Point::new(-1, -1),
        )?;

        let mut opened = Mat::default();
        imgproc::morphology_ex_def(&combined, &mut opened, imgproc::MORPH_OPEN, &kernel)?;

        let mut dilated = Mat::default();
        imgproc::dilate_def(&opened, &mut dilated, &kernel)?;

        Ok(dilated)
    }

    /// Candidate regions in contour-extraction order. Order is not meaningful.
    pub fn segment(&self, frame: &Mat) -> opencv::Result<Vec<Region>> {
        let mask = self.mask(frame)?;

        let mut contours = Vector::<Vector<Point>>::new();
        imgproc::find_contours_def(
            &mask,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_SIMPLE,
        )?;

        let mut regions = Vec::new();
        for contour in contours.iter() {
            let region = Region::from(imgproc::bounding_rect(&contour)?);
            if region.meets_minimum(self.min_region_size) {
                regions.push(region);
            }
        }

        tracing::debug!(
            "Segmented {} contours into {} regions",
            contours.len(),
            regions.len()
        );

        Ok(regions)
    }
}
