use std::io::Cursor;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::LineSeries;
use plotters::prelude::*;
use crate::drivers::error::AcquisitionError;
use crate::types::MeasurementRecord;
#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub raw_color: RGBColor,
    pub filtered_color: RGBColor,
}
impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 400,
            background: RGBColor(10, 10, 10),
            raw_color: RGBColor(90, 90, 90),
            filtered_color: CYAN,
        }
    }
}
/// Draws the raw trace with the filtered trace on top, as a PNG.
///
/// No axes or labels are drawn so rendering needs no font backend.
pub fn render_trace_png(
    record: &MeasurementRecord,
    style: &PlotStyle,
) -> Result<Vec<u8>, AcquisitionError> {
    let points = record.points();
    if points.is_empty() {
        return Err(AcquisitionError::Plot("measurement has no samples".into()));
    }
    let (x_min, x_max) = bounds(points.iter().map(|p| p.0));
    let (y_min, y_max) = bounds(points.iter().flat_map(|p| [p.1, p.2]));
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .build_cartesian_2d(x_min..x_max, y_min..y_max)?;
        chart.draw_series(LineSeries::new(
            points.iter().map(|p| (p.0, p.1)),
            &style.raw_color,
        ))?;
        chart.draw_series(LineSeries::new(
            points.iter().map(|p| (p.0, p.2)),
            &style.filtered_color,
        ))?;
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (-1.0, 1.0);
    }
    // keep a flat trace from collapsing the axis
    if (hi - lo).abs() < f64::EPSILON {
        (lo - 1.0, hi + 1.0)
    } else {
        (lo, hi)
    }
}
fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, AcquisitionError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| AcquisitionError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CvSample;
    #[test]
    fn renders_png_bytes() {
        let samples = (0..50)
            .map(|i| CvSample {
                pwm: i as f64,
                raw_value: (i as f64 * 0.3).sin(),
                filtered_value: (i as f64 * 0.3).sin() * 0.9,
            })
            .collect();
        let png = render_trace_png(&MeasurementRecord::Cv(samples), &PlotStyle::default()).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
    }
    #[test]
    fn empty_record_is_an_error() {
        let err = render_trace_png(&MeasurementRecord::Ca(Vec::new()), &PlotStyle::default());
        assert!(matches!(err, Err(AcquisitionError::Plot(_))));
    }
    #[test]
    fn flat_trace_gets_nonzero_range() {
        assert_eq!(bounds([2.0, 2.0].into_iter()), (1.0, 3.0));
    }
}
