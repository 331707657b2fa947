use crate::detect::result::BoundingBox;
use crate::frame::FrameShape;

/// Map boxes from one pixel shape to another.
///
/// Each axis is scaled by destination/source, rounded to the nearest pixel
/// (halves away from zero) and clamped to `[0, dim - 1]`. Corners that end up
/// inverted after clamping are swapped. A zero-area shape on either side
/// yields no boxes.
pub fn rescale(boxes: &[BoundingBox], from: FrameShape, to: FrameShape) -> Vec<BoundingBox> {
    if boxes.is_empty() || from.is_empty() || to.is_empty() {
        return Vec::new();
    }

    let sx = to.width as f64 / from.width as f64;
    let sy = to.height as f64 / from.height as f64;

    boxes
        .iter()
        .map(|b| {
            BoundingBox::new(
                scale_coord(b.x1, sx),
                scale_coord(b.y1, sy),
                scale_coord(b.x2, sx),
                scale_coord(b.y2, sy),
            )
            .clamped_to(to)
            .normalized()
        })
        .collect()
}

fn scale_coord(value: i32, scale: f64) -> i32 {
    let scaled = (value as f64 * scale).round();
    scaled.clamp(i32::MIN as f64, i32::MAX as f64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn doubles_a_box_between_square_shapes() {
        let out = rescale(
            &[BoundingBox::new(10, 10, 50, 50)],
            FrameShape::new(100, 100),
            FrameShape::new(200, 200),
        );
        assert_eq!(out, vec![BoundingBox::new(20, 20, 100, 100)]);
    }

    #[test]
    fn preview_to_video_aspect_change() {
        // 320x160 preview -> 1280x720 video: x * 4, y * 4.5
        let out = rescale(
            &[BoundingBox::new(32, 16, 64, 48)],
            FrameShape::new(160, 320),
            FrameShape::new(720, 1280),
        );
        assert_eq!(out, vec![BoundingBox::new(128, 72, 256, 216)]);
    }

    #[test]
    fn empty_inputs_and_zero_area_shapes_give_nothing() {
        let b = [BoundingBox::new(1, 1, 5, 5)];
        assert!(rescale(&[], FrameShape::new(10, 10), FrameShape::new(20, 20)).is_empty());
        assert!(rescale(&b, FrameShape::new(0, 10), FrameShape::new(20, 20)).is_empty());
        assert!(rescale(&b, FrameShape::new(10, 0), FrameShape::new(20, 20)).is_empty());
        assert!(rescale(&b, FrameShape::new(10, 10), FrameShape::new(20, 0)).is_empty());
        assert!(rescale(&b, FrameShape::new(10, 10), FrameShape::new(0, 20)).is_empty());
    }

    #[test]
    fn out_of_range_and_inverted_boxes_are_clamped_and_ordered() {
        let out = rescale(
            &[BoundingBox::new(90, -20, -5, 500)],
            FrameShape::new(100, 100),
            FrameShape::new(50, 50),
        );
        assert_eq!(out, vec![BoundingBox::new(0, 0, 45, 49)]);
    }

    #[test]
    fn identity_shape_is_within_one_pixel() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let w = rng.gen_range(1..2000u32);
            let h = rng.gen_range(1..2000u32);
            let shape = FrameShape::new(h, w);
            let x1 = rng.gen_range(0..w as i32);
            let x2 = rng.gen_range(x1..w as i32);
            let y1 = rng.gen_range(0..h as i32);
            let y2 = rng.gen_range(y1..h as i32);
            let input = BoundingBox::new(x1, y1, x2, y2);
            let out = rescale(&[input], shape, shape);
            let o = out[0];
            assert!((o.x1 - input.x1).abs() <= 1);
            assert!((o.y1 - input.y1).abs() <= 1);
            assert!((o.x2 - input.x2).abs() <= 1);
            assert!((o.y2 - input.y2).abs() <= 1);
        }
    }

    #[test]
    fn output_always_lies_inside_destination() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..2000 {
            let from = FrameShape::new(rng.gen_range(1..4000), rng.gen_range(1..4000));
            let to = FrameShape::new(rng.gen_range(1..4000), rng.gen_range(1..4000));
            let input = BoundingBox::new(
                rng.gen_range(-500..5000),
                rng.gen_range(-500..5000),
                rng.gen_range(-500..5000),
                rng.gen_range(-500..5000),
            );
            for o in rescale(&[input], from, to) {
                assert!(0 <= o.x1 && o.x1 <= o.x2 && o.x2 <= to.width as i32 - 1);
                assert!(0 <= o.y1 && o.y1 <= o.y2 && o.y2 <= to.height as i32 - 1);
            }
        }
    }
}
