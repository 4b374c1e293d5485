use crate::detection::Detection;
use opencv::{
    core::{Mat, Point, Rect, Scalar},
    imgproc,
};

const FONT_FACE: i32 = imgproc::FONT_HERSHEY_SIMPLEX;
const FONT_SCALE: f64 = 0.7;
const FONT_THICKNESS: i32 = 2;
const BOX_THICKNESS: i32 = 3;
const LABEL_PADDING: i32 = 10;

/// Draws every detection onto `frame`. Later boxes are drawn over earlier ones.
pub fn annotate(frame: &mut Mat, detections: &[Detection]) -> opencv::Result<()> {
    for detection in detections {
        let color = detection.label.color();
        let bbox = detection.bbox;

        imgproc::rectangle(
            frame,
            bbox.to_rect(),
            color,
            BOX_THICKNESS,
            imgproc::LINE_8,
            0,
        )?;

        let caption = detection.caption();
        let mut baseline = 0;
        let text_size =
            imgproc::get_text_size(&caption, FONT_FACE, FONT_SCALE, FONT_THICKNESS, &mut baseline)?;

        let label_height = text_size.height + LABEL_PADDING;
        // Flip the label inside the box when it would run off the top.
        let label_top = if bbox.y - label_height >= 0 {
            bbox.y - label_height
        } else {
            bbox.y
        };

        imgproc::rectangle(
            frame,
            Rect::new(bbox.x, label_top, text_size.width, label_height),
            color,
            imgproc::FILLED,
            imgproc::LINE_8,
            0,
        )?;

        imgproc::put_text(
            frame,
            &caption,
            Point::new(bbox.x, label_top + label_height - 5),
            FONT_FACE,
            FONT_SCALE,
            Scalar::new(255.0, 255.0, 255.0, 0.0),
            FONT_THICKNESS,
            imgproc::LINE_8,
            false,
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{FreshnessLabel, Region};
    use opencv::core::{Vec3b, CV_8UC3};
    use opencv::prelude::*;

    fn black_frame() -> Mat {
        Mat::new_rows_cols_with_default(200, 200, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn test_box_is_drawn_in_label_color() {
        let mut frame = black_frame();
        let detection = Detection {
            label: FreshnessLabel::Damaged,
            confidence: 0.9,
            bbox: Region::new(50, 80, 60, 60),
        };

        annotate(&mut frame, &[detection]).unwrap();

        // Bottom edge of the box, away from the label.
        let pixel = *frame.at_2d::<Vec3b>(139, 80).unwrap();
        assert_eq!(pixel.0, [0, 0, 255]);
    }

    fn label_size(detection: &Detection) -> (i32, i32) {
        let mut baseline = 0;
        let size = imgproc::get_text_size(
            &detection.caption(),
            FONT_FACE,
            FONT_SCALE,
            FONT_THICKNESS,
            &mut baseline,
        )
        .unwrap();
        (size.width, size.height + LABEL_PADDING)
    }

    // Narrow boxes so the caption background extends past the right edge.
    const PAST_BOX: i32 = 55;

    #[test]
    fn test_label_sits_above_box_when_there_is_room() {
        let mut frame = black_frame();
        let detection = Detection {
            label: FreshnessLabel::Damaged,
            confidence: 0.5,
            bbox: Region::new(20, 100, 30, 80),
        };
        let (width, height) = label_size(&detection);
        assert!(20 + width > PAST_BOX);

        annotate(&mut frame, &[detection]).unwrap();

        let above = *frame.at_2d::<Vec3b>(100 - height + 1, PAST_BOX).unwrap();
        let beside = *frame.at_2d::<Vec3b>(106, PAST_BOX).unwrap();
        assert_eq!(above.0, [0, 0, 255]);
        assert_eq!(beside.0, [0, 0, 0]);
    }

    #[test]
    fn test_label_flips_inside_box_at_top_edge() {
        let mut frame = black_frame();
        let detection = Detection {
            label: FreshnessLabel::Damaged,
            confidence: 0.5,
            bbox: Region::new(20, 5, 30, 80),
        };
        let (width, height) = label_size(&detection);
        assert!(5 - height < 0);
        assert!(20 + width > PAST_BOX);

        annotate(&mut frame, &[detection]).unwrap();

        let inside = *frame.at_2d::<Vec3b>(6, PAST_BOX).unwrap();
        let above = *frame.at_2d::<Vec3b>(1, PAST_BOX).unwrap();
        assert_eq!(inside.0, [0, 0, 255]);
        assert_eq!(above.0, [0, 0, 0]);
    }

    #[test]
    fn test_boxes_at_image_edges_do_not_fail() {
        let mut frame = black_frame();
        let detections = [
            Detection {
                label: FreshnessLabel::Ripe,
                confidence: 0.5,
                bbox: Region::new(0, 0, 40, 40),
            },
            Detection {
                label: FreshnessLabel::Unripe,
                confidence: 1.0,
                bbox: Region::new(170, 170, 30, 30),
            },
        ];

        assert!(annotate(&mut frame, &detections).is_ok());
        assert_eq!(frame.rows(), 200);
        assert_eq!(frame.cols(), 200);
    }

    #[test]
    fn test_no_detections_leaves_frame_untouched() {
        let mut frame = black_frame();
        annotate(&mut frame, &[]).unwrap();

        let mut non_zero = 0;
        for row in 0..frame.rows() {
            for col in 0..frame.cols() {
                if frame.at_2d::<Vec3b>(row, col).unwrap().0 != [0, 0, 0] {
                    non_zero += 1;
                }
            }
        }
        assert_eq!(non_zero, 0);
    }
}
