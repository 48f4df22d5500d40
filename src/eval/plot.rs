//! Charts for accuracy and confusion-matrix reports.
//!
//! Plot functions only validate and format; they return a [`Figure`] that
//! the caller renders with [`Figure::render_svg`] and stores wherever it
//! likes.

use super::metrics::{AccuracyReport, ConfusionMatrix};
use crate::error::{Result, VqaError};
use base64::Engine;
use image::{ImageFormat, RgbImage};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::fmt::Write as _;
use std::io::Cursor;

/// Pixel size of a figure.
pub type FigureSize = (u32, u32);

const BAR_COLOR: RGBColor = RGBColor(135, 206, 235);
const HEAT_LOW: RGBColor = RGBColor(247, 251, 255);
const HEAT_HIGH: RGBColor = RGBColor(8, 48, 107);
const Y_MAX: f64 = 1.1;
const FONT: &str = "sans-serif";

/// Vertical bars with one percentage value per category.
#[derive(Debug, Clone)]
pub struct BarChart {
    pub title: String,
    pub y_label: String,
    pub categories: Vec<String>,
    pub values: Vec<f64>,
    pub size: FigureSize,
}

/// Annotated confusion-matrix heat map.
#[derive(Debug, Clone)]
pub struct HeatmapChart {
    pub title: String,
    pub matrix: ConfusionMatrix,
    pub size: FigureSize,
}

/// Images laid out on a fixed grid, row by row.
#[derive(Debug, Clone)]
pub struct ImageGrid {
    pub images: Vec<RgbImage>,
    pub titles: Vec<String>,
    pub rows: u32,
    pub cols: u32,
    pub size: FigureSize,
}

/// A renderable figure.
#[derive(Debug, Clone)]
pub enum Figure {
    Bar(BarChart),
    Heatmap(HeatmapChart),
    ImageGrid(ImageGrid),
}

impl Figure {
    pub fn title(&self) -> &str {
        match self {
            Figure::Bar(chart) => &chart.title,
            Figure::Heatmap(chart) => &chart.title,
            Figure::ImageGrid(_) => "",
        }
    }

    pub fn size(&self) -> FigureSize {
        match self {
            Figure::Bar(chart) => chart.size,
            Figure::Heatmap(chart) => chart.size,
            Figure::ImageGrid(grid) => grid.size,
        }
    }

    /// Render to an SVG document held in memory.
    pub fn render_svg(&self) -> Result<String> {
        match self {
            Figure::Bar(chart) => render_with(chart.size, |root| {
                draw_bar_chart(root, chart).map_err(render_error)
            }),
            Figure::Heatmap(chart) => render_with(chart.size, |root| {
                draw_heatmap(root, chart).map_err(render_error)
            }),
            Figure::ImageGrid(grid) => render_image_grid(grid),
        }
    }
}

fn render_error(err: impl std::fmt::Display) -> VqaError {
    VqaError::Render(err.to_string())
}

fn render_with(
    size: FigureSize,
    draw: impl FnOnce(&DrawingArea<SVGBackend<'_>, Shift>) -> Result<()>,
) -> Result<String> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
        draw(&root)?;
        root.present().map_err(render_error)?;
    }
    Ok(svg)
}

fn font(size: f64) -> TextStyle<'static> {
    TextStyle::from((FONT, size).into_font())
}

fn draw_bar_chart<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    bars: &BarChart,
) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    root.fill(&WHITE)?;

    let n = bars.categories.len() as f64;
    let mut chart = ChartBuilder::on(root)
        .caption(&bars.title, (FONT, 24.0).into_font())
        .margin(20)
        .x_label_area_size(48)
        .y_label_area_size(72)
        .build_cartesian_2d(0f64..n, 0f64..Y_MAX)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .bold_line_style(BLACK.mix(0.15).stroke_width(1))
        .light_line_style(WHITE.stroke_width(0))
        .y_desc(bars.y_label.as_str())
        .y_labels(12)
        .y_label_formatter(&|y: &f64| format_percent(*y, 0))
        .x_label_formatter(&|_: &f64| String::new())
        .draw()?;

    chart.draw_series(bars.values.iter().enumerate().map(|(i, &v)| {
        let x = i as f64;
        Rectangle::new([(x + 0.1, 0.0), (x + 0.9, v)], BAR_COLOR.filled())
    }))?;

    let value_style = font(14.0).pos(Pos::new(HPos::Center, VPos::Bottom));
    chart.draw_series(bars.values.iter().enumerate().map(|(i, &v)| {
        Text::new(
            format_percent(v, 2),
            (i as f64 + 0.5, v + 0.01),
            value_style.clone(),
        )
    }))?;

    let label_style = font(14.0).pos(Pos::new(HPos::Center, VPos::Top));
    for (i, category) in bars.categories.iter().enumerate() {
        let (x, y) = chart.backend_coord(&(i as f64 + 0.5, 0.0));
        root.draw(&Text::new(category.clone(), (x, y + 8), label_style.clone()))?;
    }

    Ok(())
}

fn draw_heatmap<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    heat: &HeatmapChart,
) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    root.fill(&WHITE)?;

    let labels = heat.matrix.labels();
    let n = labels.len() as f64;
    let mut chart = ChartBuilder::on(root)
        .caption(&heat.title, (FONT, 24.0).into_font())
        .margin(20)
        .x_label_area_size(56)
        .y_label_area_size(64)
        .build_cartesian_2d(0f64..n, 0f64..n)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("Predicted")
        .y_desc("True")
        .x_label_formatter(&|_: &f64| String::new())
        .y_label_formatter(&|_: &f64| String::new())
        .draw()?;

    let max = heat.matrix.max_count().max(1) as f64;
    let cell_style = font(16.0).pos(Pos::new(HPos::Center, VPos::Center));

    for (t, row) in heat.matrix.counts().iter().enumerate() {
        // First label on the top row.
        let y0 = n - 1.0 - t as f64;
        for (p, &count) in row.iter().enumerate() {
            let x0 = p as f64;
            let intensity = count as f64 / max;

            chart.draw_series(std::iter::once(Rectangle::new(
                [(x0, y0), (x0 + 1.0, y0 + 1.0)],
                blend(HEAT_LOW, HEAT_HIGH, intensity).filled(),
            )))?;

            let ink = if intensity > 0.5 { WHITE } else { BLACK };
            chart.draw_series(std::iter::once(Text::new(
                count.to_string(),
                (x0 + 0.5, y0 + 0.5),
                cell_style.clone().color(&ink),
            )))?;
        }
    }

    let x_style = font(14.0).pos(Pos::new(HPos::Center, VPos::Top));
    let y_style = font(14.0).pos(Pos::new(HPos::Right, VPos::Center));
    for (i, label) in labels.iter().enumerate() {
        let (x, y) = chart.backend_coord(&(i as f64 + 0.5, 0.0));
        root.draw(&Text::new(label.clone(), (x, y + 6), x_style.clone()))?;

        let (x, y) = chart.backend_coord(&(0.0, n - 0.5 - i as f64));
        root.draw(&Text::new(label.clone(), (x - 8, y), y_style.clone()))?;
    }

    Ok(())
}

fn render_image_grid(grid: &ImageGrid) -> Result<String> {
    let (width, height) = grid.size;
    let cell_w = width as f64 / grid.cols as f64;
    let cell_h = height as f64 / grid.rows as f64;
    let title_band = if grid.titles.is_empty() { 0.0 } else { 28.0 };
    let pad = 6.0;

    let mut svg = String::new();
    write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><rect width="{w}" height="{h}" fill="white"/>"#,
        w = width,
        h = height
    )
    .map_err(render_error)?;

    for (i, image) in grid.images.iter().enumerate() {
        let row = (i as u32 / grid.cols) as f64;
        let col = (i as u32 % grid.cols) as f64;
        let x = col * cell_w;
        let y = row * cell_h;

        if let Some(title) = grid.titles.get(i) {
            write!(
                svg,
                r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-family="{}" font-size="16">{}</text>"#,
                x + cell_w / 2.0,
                y + title_band - 8.0,
                FONT,
                escape_xml(title)
            )
            .map_err(render_error)?;
        }

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| render_error(format!("failed to encode image {}: {}", i, e)))?;
        let data = base64::engine::general_purpose::STANDARD.encode(&png);

        write!(
            svg,
            r#"<image x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" preserveAspectRatio="xMidYMid meet" href="data:image/png;base64,{}"/>"#,
            x + pad,
            y + title_band + pad,
            (cell_w - 2.0 * pad).max(1.0),
            (cell_h - title_band - 2.0 * pad).max(1.0),
            data
        )
        .map_err(render_error)?;
    }

    svg.push_str("</svg>");
    Ok(svg)
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

fn blend(low: RGBColor, high: RGBColor, t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    RGBColor(mix(low.0, high.0), mix(low.1, high.1), mix(low.2, high.2))
}

/// `0.8125` -> `"81.25%"` with `decimals = 2`.
pub fn format_percent(value: f64, decimals: usize) -> String {
    format!("{:.*}%", decimals, value * 100.0)
}

/// Python-style capitalisation: first letter upper, the rest lower.
fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn bar_chart(
    title: &str,
    y_label: &str,
    categories: Vec<String>,
    values: Vec<f64>,
    size: FigureSize,
) -> Result<Figure> {
    if categories.len() != values.len() {
        return Err(VqaError::invalid(format!(
            "{} categories but {} values",
            categories.len(),
            values.len()
        )));
    }
    if categories.is_empty() {
        return Err(VqaError::invalid("nothing to plot"));
    }
    if let Some(v) = values.iter().find(|v| !v.is_finite()) {
        return Err(VqaError::invalid(format!("cannot plot non-finite value {}", v)));
    }

    Ok(Figure::Bar(BarChart {
        title: title.to_string(),
        y_label: y_label.to_string(),
        categories,
        values,
        size,
    }))
}

/// Bar chart comparing accuracies of models or difficulty levels.
pub fn plot_accuracy_comparison(accuracies: &AccuracyReport, title: &str) -> Result<Figure> {
    bar_chart(
        title,
        "Accuracy",
        accuracies.categories(),
        accuracies.scores(),
        (1000, 600),
    )
}

/// Heat map of a confusion matrix.
pub fn plot_confusion_matrix(matrix: &ConfusionMatrix, title: &str) -> Result<Figure> {
    Ok(Figure::Heatmap(HeatmapChart {
        title: title.to_string(),
        matrix: matrix.clone(),
        size: (800, 600),
    }))
}

/// Bar chart of parallel accuracy and category slices.
pub fn plot_accuracy_by_category<S: AsRef<str>>(
    accuracies: &[f64],
    categories: &[S],
    title: &str,
) -> Result<Figure> {
    bar_chart(
        title,
        "Accuracy",
        categories.iter().map(|c| c.as_ref().to_string()).collect(),
        accuracies.to_vec(),
        (1200, 600),
    )
}

/// Grid of sample images, optionally titled. Titles beyond the number of
/// images are ignored; images without a title get none.
pub fn plot_sample_images<S: AsRef<str>>(
    images: Vec<RgbImage>,
    titles: Option<&[S]>,
    rows: u32,
    cols: u32,
) -> Result<Figure> {
    if rows == 0 || cols == 0 {
        return Err(VqaError::invalid(format!(
            "grid of {}x{} has no cells",
            rows, cols
        )));
    }
    let cells = (rows as usize).checked_mul(cols as usize);
    if cells.is_none_or(|cells| images.len() > cells) {
        return Err(VqaError::invalid(format!(
            "{} images do not fit a {}x{} grid",
            images.len(),
            rows,
            cols
        )));
    }

    let titles = titles
        .map(|t| {
            t.iter()
                .take(images.len())
                .map(|s| s.as_ref().to_string())
                .collect()
        })
        .unwrap_or_default();

    Ok(Figure::ImageGrid(ImageGrid {
        images,
        titles,
        rows,
        cols,
        size: (1500, 1000),
    }))
}

/// Bar chart of one metric across models.
pub fn plot_model_comparison(
    model_results: &AccuracyReport,
    metric: &str,
    title: &str,
) -> Result<Figure> {
    bar_chart(
        title,
        &capitalize(metric),
        model_results.categories(),
        model_results.scores(),
        (1000, 600),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::metrics::{DEFAULT_LABELS, confusion_matrix};

    fn report() -> AccuracyReport {
        [("easy", 0.8125), ("medium", 0.5), ("hard", 0.25)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(0.8125, 2), "81.25%");
        assert_eq!(format_percent(0.4, 0), "40%");
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("accuracy"), "Accuracy");
        assert_eq!(capitalize("F1 SCORE"), "F1 score");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_accuracy_comparison_figure() {
        let figure = plot_accuracy_comparison(&report(), "Accuracy Comparison").unwrap();
        match &figure {
            Figure::Bar(chart) => {
                assert_eq!(chart.categories, vec!["easy", "medium", "hard"]);
                assert_eq!(chart.y_label, "Accuracy");
            }
            other => panic!("unexpected figure {:?}", other),
        }

        let svg = figure.render_svg().unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("Accuracy Comparison"));
        assert!(svg.contains("81.25%"));
        assert!(svg.contains("medium"));
    }

    #[test]
    fn test_model_comparison_uses_metric_label() {
        let figure = plot_model_comparison(&report(), "accuracy", "Model Comparison").unwrap();
        match figure {
            Figure::Bar(chart) => assert_eq!(chart.y_label, "Accuracy"),
            other => panic!("unexpected figure {:?}", other),
        }
    }

    #[test]
    fn test_accuracy_by_category_length_mismatch() {
        let err = plot_accuracy_by_category(&[0.5, 0.6], &["a"], "t").unwrap_err();
        assert!(matches!(err, VqaError::InvalidArgument(_)));
    }

    #[test]
    fn test_bar_chart_rejects_empty_and_nan() {
        let empty: [&str; 0] = [];
        assert!(plot_accuracy_by_category(&[], &empty, "t").is_err());
        assert!(plot_accuracy_by_category(&[f64::NAN], &["a"], "t").is_err());
    }

    #[test]
    fn test_confusion_matrix_figure_renders_counts() {
        let matrix =
            confusion_matrix(&["A", "B", "A", "C"], &["A", "B", "B", "C"], &DEFAULT_LABELS)
                .unwrap();
        let figure = plot_confusion_matrix(&matrix, "Confusion Matrix").unwrap();
        let svg = figure.render_svg().unwrap();
        assert!(svg.contains("Confusion Matrix"));
        assert!(svg.contains("Predicted"));
        assert!(svg.contains("True"));
    }

    #[test]
    fn test_sample_images_grid() {
        let images = vec![
            RgbImage::from_pixel(8, 6, image::Rgb([255, 0, 0])),
            RgbImage::from_pixel(8, 6, image::Rgb([0, 255, 0])),
        ];
        let titles = ["red & warm", "green", "unused"];
        let figure = plot_sample_images(images, Some(&titles[..]), 2, 3).unwrap();

        match &figure {
            Figure::ImageGrid(grid) => assert_eq!(grid.titles.len(), 2),
            other => panic!("unexpected figure {:?}", other),
        }

        let svg = figure.render_svg().unwrap();
        assert_eq!(svg.matches("<image ").count(), 2);
        assert!(svg.contains("red &amp; warm"));
        assert!(svg.ends_with("</svg>"));
    }

    #[test]
    fn test_sample_images_too_many() {
        let images = vec![RgbImage::new(2, 2); 5];
        let err = plot_sample_images::<&str>(images, None, 2, 2).unwrap_err();
        assert!(matches!(err, VqaError::InvalidArgument(_)));
    }

    #[test]
    fn test_sample_images_huge_grid_does_not_overflow() {
        let images = vec![RgbImage::new(1, 1)];
        let figure = plot_sample_images::<&str>(images, None, 70_000, 70_000).unwrap();
        match figure {
            Figure::ImageGrid(grid) => assert_eq!((grid.rows, grid.cols), (70_000, 70_000)),
            other => panic!("unexpected figure {:?}", other),
        }
    }

    #[test]
    fn test_sample_images_empty_grid() {
        let err = plot_sample_images::<&str>(Vec::new(), None, 0, 3).unwrap_err();
        assert!(matches!(err, VqaError::InvalidArgument(_)));
    }
}
