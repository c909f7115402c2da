use serde::{Deserialize, Serialize};

/// Direction a chart annotation points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Bullish,
    Bearish,
}

impl Tone {
    fn color(self) -> &'static str {
        match self {
            Tone::Bullish => "green",
            Tone::Bearish => "red",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSeries {
    pub label: String,
    pub color: String,
    pub opacity: f64,
    pub values: Vec<f64>,
}

/// Shaded region between two series. Each segment takes the `above_*` style
/// where `upper >= lower` at its left edge, the `below_*` style otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudBand {
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
    pub above_label: String,
    pub above_color: String,
    pub below_label: String,
    pub below_color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Bar index within the chart window.
    pub index: usize,
    pub price: f64,
    pub label: String,
    pub tone: Tone,
}

/// Displayable chart produced by an indicator.
///
/// Kept as data so sinks can choose a format; `render_svg` is the built-in one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartArtifact {
    pub title: String,
    pub x_labels: Vec<String>,
    pub lines: Vec<LineSeries>,
    pub clouds: Vec<CloudBand>,
    pub annotations: Vec<Annotation>,
}

const WIDTH: f64 = 1500.0;
const HEIGHT: f64 = 1000.0;
const MARGIN: f64 = 80.0;

impl ChartArtifact {
    pub fn file_name(&self) -> &'static str {
        "plot.svg"
    }

    pub fn bar_count(&self) -> usize {
        self.x_labels.len()
    }

    /// Render as a standalone SVG document.
    pub fn render_svg(&self) -> String {
        let n = self.bar_count();
        let (lo, hi) = self.price_range();
        let span = (hi - lo).max(f64::EPSILON);
        let plot_w = WIDTH - 2.0 * MARGIN;
        let plot_h = HEIGHT - 2.0 * MARGIN;

        let x = |i: usize| -> f64 {
            if n <= 1 {
                MARGIN + plot_w / 2.0
            } else {
                MARGIN + plot_w * i as f64 / (n - 1) as f64
            }
        };
        let y = |v: f64| -> f64 { MARGIN + plot_h * (hi - v) / span };

        let mut svg = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{WIDTH}\" height=\"{HEIGHT}\" \
             viewBox=\"0 0 {WIDTH} {HEIGHT}\">\n\
             <rect width=\"100%\" height=\"100%\" fill=\"white\"/>\n\
             <text x=\"{}\" y=\"{}\" font-size=\"24\" text-anchor=\"middle\">{}</text>\n",
            WIDTH / 2.0,
            MARGIN / 2.0,
            escape(&self.title)
        );

        // Grid and axes
        for step in 0..=5 {
            let v = lo + span * step as f64 / 5.0;
            let gy = y(v);
            svg.push_str(&format!(
                "<line x1=\"{MARGIN}\" y1=\"{gy:.1}\" x2=\"{:.1}\" y2=\"{gy:.1}\" stroke=\"#ddd\"/>\n\
                 <text x=\"{:.1}\" y=\"{:.1}\" font-size=\"12\" text-anchor=\"end\">{v:.2}</text>\n",
                WIDTH - MARGIN,
                MARGIN - 6.0,
                gy + 4.0,
            ));
        }
        let tick_every = (n / 10).max(1);
        for (i, label) in self.x_labels.iter().enumerate().step_by(tick_every) {
            let tx = x(i);
            let ty = HEIGHT - MARGIN + 16.0;
            svg.push_str(&format!(
                "<text x=\"{tx:.1}\" y=\"{ty:.1}\" font-size=\"11\" \
                 transform=\"rotate(45 {tx:.1} {ty:.1})\">{}</text>\n",
                escape(label)
            ));
        }

        for cloud in &self.clouds {
            let len = cloud.upper.len().min(cloud.lower.len()).min(n);
            for i in 0..len.saturating_sub(1) {
                let (a0, a1, b0, b1) = (cloud.upper[i], cloud.upper[i + 1], cloud.lower[i], cloud.lower[i + 1]);
                let fill = if a0 >= b0 { &cloud.above_color } else { &cloud.below_color };
                svg.push_str(&format!(
                    "<polygon points=\"{:.1},{:.1} {:.1},{:.1} {:.1},{:.1} {:.1},{:.1}\" \
                     fill=\"{fill}\" fill-opacity=\"0.5\" stroke=\"none\"/>\n",
                    x(i), y(a0), x(i + 1), y(a1), x(i + 1), y(b1), x(i), y(b0),
                ));
            }
        }

        for line in &self.lines {
            let points: Vec<String> = line
                .values
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_finite())
                .map(|(i, &v)| format!("{:.1},{:.1}", x(i), y(v)))
                .collect();
            svg.push_str(&format!(
                "<polyline points=\"{}\" fill=\"none\" stroke=\"{}\" stroke-opacity=\"{}\" stroke-width=\"2\"/>\n",
                points.join(" "),
                line.color,
                line.opacity
            ));
        }

        for note in &self.annotations {
            let ax = x(note.index);
            let ay = y(note.price);
            // Bullish arrows sit under the price and point up; bearish the reverse.
            let (tip, base, text_y) = match note.tone {
                Tone::Bullish => (ay + 4.0, ay + 18.0, ay + 32.0),
                Tone::Bearish => (ay - 4.0, ay - 18.0, ay - 24.0),
            };
            svg.push_str(&format!(
                "<polygon points=\"{ax:.1},{tip:.1} {:.1},{base:.1} {:.1},{base:.1}\" fill=\"{color}\"/>\n\
                 <text x=\"{ax:.1}\" y=\"{text_y:.1}\" font-size=\"11\" text-anchor=\"middle\" fill=\"{color}\">{}</text>\n",
                ax - 6.0,
                ax + 6.0,
                escape(&note.label),
                color = note.tone.color(),
            ));
        }

        let mut legend_y = MARGIN + 16.0;
        let legend: Vec<(&str, &str)> = self
            .lines
            .iter()
            .map(|l| (l.label.as_str(), l.color.as_str()))
            .chain(self.clouds.iter().flat_map(|c| {
                [
                    (c.above_label.as_str(), c.above_color.as_str()),
                    (c.below_label.as_str(), c.below_color.as_str()),
                ]
            }))
            .collect();
        for (label, color) in legend {
            svg.push_str(&format!(
                "<rect x=\"{:.1}\" y=\"{:.1}\" width=\"14\" height=\"10\" fill=\"{color}\"/>\n\
                 <text x=\"{:.1}\" y=\"{legend_y:.1}\" font-size=\"12\">{}</text>\n",
                MARGIN + 10.0,
                legend_y - 9.0,
                MARGIN + 30.0,
                escape(label)
            ));
            legend_y += 16.0;
        }

        svg.push_str("</svg>\n");
        svg
    }

    /// Min and max over every finite plotted value, padded by 2%.
    fn price_range(&self) -> (f64, f64) {
        let values = self
            .lines
            .iter()
            .flat_map(|l| l.values.iter())
            .chain(self.clouds.iter().flat_map(|c| c.upper.iter().chain(c.lower.iter())))
            .copied()
            .filter(|v| v.is_finite());

        let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        if !lo.is_finite() || !hi.is_finite() {
            return (0.0, 1.0);
        }
        let pad = ((hi - lo) * 0.02).max(hi.abs() * 0.001).max(f64::EPSILON);
        (lo - pad, hi + pad)
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChartArtifact {
        ChartArtifact {
            title: "Ribbon <test>".into(),
            x_labels: vec!["a".into(), "b".into(), "c".into()],
            lines: vec![LineSeries {
                label: "Fast EMA (8)".into(),
                color: "green".into(),
                opacity: 1.0,
                values: vec![1.0, 2.0, 3.0],
            }],
            clouds: vec![CloudBand {
                upper: vec![1.0, 2.0, 3.0],
                lower: vec![2.0, 2.0, 2.0],
                above_label: "Bullish".into(),
                above_color: "green".into(),
                below_label: "Bearish".into(),
                below_color: "red".into(),
            }],
            annotations: vec![Annotation {
                index: 1,
                price: 2.0,
                label: "Bullish Clouds".into(),
                tone: Tone::Bullish,
            }],
        }
    }

    #[test]
    fn svg_escapes_title_and_contains_layers() {
        let svg = sample().render_svg();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Ribbon &lt;test&gt;"));
        assert!(svg.contains("<polyline"));
        assert!(svg.contains("Bullish Clouds"));
        // one cloud segment per adjacent bar pair
        assert_eq!(svg.matches("fill-opacity=\"0.5\"").count(), 2);
    }

    #[test]
    fn cloud_segment_colour_follows_ordering() {
        let svg = sample().render_svg();
        // first segment: upper 1.0 < lower 2.0 → bearish colour
        let first = svg.find("fill=\"red\" fill-opacity").unwrap();
        let second = svg.find("fill=\"green\" fill-opacity").unwrap();
        assert!(first < second);
    }

    #[test]
    fn empty_chart_still_renders() {
        let chart = ChartArtifact {
            title: "empty".into(),
            x_labels: vec![],
            lines: vec![],
            clouds: vec![],
            annotations: vec![],
        };
        assert!(chart.render_svg().ends_with("</svg>\n"));
    }
}
