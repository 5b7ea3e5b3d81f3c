//! HTML report generation with charts

use serde_json::{json, Value};

use super::{narrative, Aggregates, ReportError};
use crate::classifier::Tier;
use crate::config::MetricGroup;
use crate::session::Session;

const LINE_COLORS: [&str; 6] = [
    "rgba(54, 162, 235, 1)",
    "rgba(255, 99, 132, 1)",
    "rgba(75, 192, 192, 1)",
    "rgba(255, 159, 64, 1)",
    "rgba(153, 102, 255, 1)",
    "rgba(201, 203, 207, 1)",
];

/// Renders the complete report document
pub(super) fn render(session: &Session, aggregates: &Aggregates) -> Result<String, ReportError> {
    let site = escape_html(&session.header.site_name);
    let groups: Vec<MetricGroup> = MetricGroup::ALL
        .into_iter()
        .filter(|g| session.metrics().iter().any(|m| m.group == *g))
        .collect();

    let mut charts = Vec::new();
    for group in &groups {
        charts.push(generate_chart_script(session, *group)?);
    }

    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Network Survey Report: {site}</title>
    <script src="https://cdn.jsdelivr.net/npm/chart.js@4.4.0/dist/chart.umd.min.js"></script>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, Cantarell, sans-serif;
            margin: 0;
            padding: 20px;
            background: #f5f5f5;
        }}
        .container {{
            max-width: 1000px;
            margin: 0 auto;
            background: white;
            padding: 30px;
            border-radius: 8px;
            box-shadow: 0 2px 4px rgba(0,0,0,0.1);
        }}
        h1 {{
            color: #333;
            border-bottom: 3px solid #007bff;
            padding-bottom: 10px;
        }}
        h2 {{
            color: #555;
            margin-top: 30px;
            border-bottom: 2px solid #eee;
            padding-bottom: 8px;
        }}
        .metadata {{
            background: #f8f9fa;
            padding: 15px;
            border-radius: 4px;
            margin: 20px 0;
        }}
        .metadata p {{
            margin: 5px 0;
        }}
        table {{
            width: 100%;
            border-collapse: collapse;
            margin: 20px 0;
        }}
        th, td {{
            padding: 8px 12px;
            text-align: left;
            border-bottom: 1px solid #ddd;
        }}
        th {{
            background: #f8f9fa;
            font-weight: 600;
        }}
        .light {{
            display: inline-block;
            width: 16px;
            height: 16px;
            border-radius: 50%;
            vertical-align: middle;
        }}
        .explanations p, .summary p {{
            margin: 4px 0;
            font-size: 14px;
        }}
        .chart-container {{
            position: relative;
            height: 300px;
            margin: 30px 0;
        }}
    </style>
</head>
<body>
    <div class="container">
        <h1>{site} - Network Survey Report</h1>
        <div class="metadata">
            <p><strong>Started:</strong> {started}</p>
            <p><strong>Samples:</strong> {samples} (every {interval}s, planned duration {duration}s)</p>
        </div>

        <h2>Traffic Light Summary</h2>
        <table>
            <tr>
                <th></th>
                <th>Metric</th>
                <th>Average</th>
                <th>Min</th>
                <th>Max</th>
                <th>Readings</th>
            </tr>
            {grid}
        </table>

        <h2>Metric Explanations</h2>
        <div class="explanations">
            {explanations}
        </div>

        <h2>Executive Summary</h2>
        <div class="summary">
            {summary}
            <p>Traffic lights above indicate network quality. Charts below show trends over time.</p>
        </div>

        <h2>Performance Charts</h2>
        {canvases}
    </div>
    <script>
        {charts}
    </script>
</body>
</html>"#,
        site = site,
        started = session.header.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        samples = session.len(),
        interval = session.header.interval_secs,
        duration = session.header.duration_secs,
        grid = generate_grid_rows(session, aggregates),
        explanations = generate_explanations(session),
        summary = narrative(session, aggregates)
            .iter()
            .map(|line| format!("<p>{}</p>", escape_html(line)))
            .collect::<Vec<_>>()
            .join("\n            "),
        canvases = groups
            .iter()
            .map(|g| format!(
                r#"<h3>{}</h3>
        <div class="chart-container">
            <canvas id="{}"></canvas>
        </div>"#,
                g.title(),
                chart_id(*g)
            ))
            .collect::<Vec<_>>()
            .join("\n        "),
        charts = charts.join("\n"),
    ))
}

fn chart_id(group: MetricGroup) -> &'static str {
    match group {
        MetricGroup::Throughput => "throughputChart",
        MetricGroup::Radio => "radioChart",
        MetricGroup::VoipQuality => "voipChart",
    }
}

fn generate_grid_rows(session: &Session, aggregates: &Aggregates) -> String {
    session
        .metrics()
        .iter()
        .map(|definition| {
            let result = aggregates.get(&definition.id);
            let tier = result.map_or(Tier::Unavailable, |r| r.tier);
            let format_opt = |v: Option<f64>| v.map_or_else(|| "N/A".to_string(), |v| format!("{:.2}", v));

            format!(
                r#"<tr>
                <td><span class="light" style="background: {}" title="{}"></span></td>
                <td>{}</td>
                <td>{}</td>
                <td>{}</td>
                <td>{}</td>
                <td>{}/{}</td>
            </tr>"#,
                tier.color(),
                tier.label(),
                escape_html(&definition.display_name()),
                result.map_or_else(|| "N/A".to_string(), |r| r.formatted_mean()),
                format_opt(result.and_then(|r| r.min)),
                format_opt(result.and_then(|r| r.max)),
                result.map_or(0, |r| r.present),
                session.len(),
            )
        })
        .collect::<Vec<_>>()
        .join("\n            ")
}

/// One explanation per distinct label, per-target metrics share theirs
fn generate_explanations(session: &Session) -> String {
    let mut seen: Vec<&str> = Vec::new();
    let mut paragraphs = Vec::new();

    for definition in session.metrics() {
        if definition.description.is_empty() || seen.contains(&definition.description.as_str()) {
            continue;
        }
        seen.push(&definition.description);

        let family = definition.label.split_whitespace().next().unwrap_or_default();
        let family = if definition.label.starts_with("Packet Loss") {
            "Packet Loss"
        } else {
            family
        };

        paragraphs.push(format!(
            "<p><strong>{} ({}):</strong> {}</p>",
            escape_html(family),
            escape_html(&definition.unit),
            escape_html(&definition.description)
        ));
    }

    paragraphs.join("\n            ")
}

/// Line chart for one metric group; missing readings are gaps
fn generate_chart_script(session: &Session, group: MetricGroup) -> Result<String, ReportError> {
    let labels: Vec<String> = session
        .samples()
        .iter()
        .map(|s| s.timestamp.format("%H:%M:%S").to_string())
        .collect();

    let datasets: Vec<Value> = session
        .metrics()
        .iter()
        .filter(|m| m.group == group)
        .enumerate()
        .map(|(i, definition)| {
            let data: Vec<Option<f64>> = session
                .series(&definition.id)
                .into_iter()
                .map(|(_, value)| value)
                .collect();
            let color = LINE_COLORS[i % LINE_COLORS.len()];

            json!({
                "label": definition.display_name(),
                "data": data,
                "borderColor": color,
                "backgroundColor": color,
                "borderWidth": 2,
                "spanGaps": false,
            })
        })
        .collect();

    let config = json!({
        "type": "line",
        "data": { "labels": labels, "datasets": datasets },
        "options": {
            "responsive": true,
            "maintainAspectRatio": false,
            "scales": {
                "x": { "title": { "display": true, "text": "Time (UTC)" } },
                "y": { "title": { "display": true, "text": group.title() } }
            }
        }
    });

    // Keep embedded strings from closing the script element
    let config = serde_json::to_string(&config)?.replace("</", "<\\/");

    Ok(format!(
        "new Chart(document.getElementById('{}'), {});",
        chart_id(group),
        config
    ))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::super::tests::sample_session;
    use super::*;
    use crate::aggregator::aggregate;

    #[test]
    fn test_sections_in_order() {
        let session = sample_session();
        let html = render(&session, &aggregate(&session)).unwrap();

        let title = html.find("Warehouse &lt;North&gt; - Network Survey Report").unwrap();
        let grid = html.find("Traffic Light Summary").unwrap();
        let explanations = html.find("Metric Explanations").unwrap();
        let summary = html.find("Executive Summary").unwrap();
        let charts = html.find("Performance Charts").unwrap();

        assert!(title < grid && grid < explanations && explanations < summary && summary < charts);
        assert!(!html.contains("Warehouse <North>"));
    }

    #[test]
    fn test_grid_colors_and_na() {
        let session = sample_session();
        let html = render(&session, &aggregate(&session)).unwrap();

        // Latency averages 83.33 ms: yellow
        assert!(html.contains(r##"<span class="light" style="background: #ffc800" title="Fair"></span></td>
                <td>Latency 1.1.1.1 (ms)</td>
                <td>83.33</td>"##));
        // Upload never measured: gray with N/A, never red
        assert!(html.contains(r##"<span class="light" style="background: #808080" title="N/A"></span></td>
                <td>Upload (Mbps)</td>
                <td>N/A</td>"##));
    }

    #[test]
    fn test_one_chart_per_group() {
        let session = sample_session();
        let html = render(&session, &aggregate(&session)).unwrap();

        assert!(html.contains("getElementById('throughputChart')"));
        assert!(html.contains("getElementById('radioChart')"));
        assert!(html.contains("getElementById('voipChart')"));
        // The missing RSRP reading is a gap, not a zero
        assert!(html.contains(r#""data":[-92.0,null,-92.0]"#));
    }

    #[test]
    fn test_explanations_deduplicated() {
        let mut session = sample_session();
        let mut second = session.header.metrics[2].clone();
        second.id = "latency:8.8.8.8".to_string();
        second.label = "Latency 8.8.8.8".to_string();
        session.header.metrics.push(second);

        let text = generate_explanations(&session);
        assert_eq!(text.matches("Latency (ms)").count(), 1);
        assert_eq!(text.matches("Packet Loss (%)").count(), 1);
    }
}
