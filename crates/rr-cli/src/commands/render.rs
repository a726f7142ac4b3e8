//! Render command: JSON timeline request to PNG.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use rr_call::{Attachment, MessageHandle, NotificationSink, StatusMessage};
use rr_core::report::REPORT_COLOR;
use rr_core::{ChannelId, ReportImage, StatusReport, TIMELINE_ATTACHMENT};
use rr_timeline::RenderRequest;

/// Renders the request at `request_path`. Avatar paths resolve against the
/// request's directory.
pub fn render_request(request_path: &Path) -> Result<Vec<u8>> {
    let json = std::fs::read_to_string(request_path)
        .with_context(|| format!("failed to read {}", request_path.display()))?;
    let request = RenderRequest::from_json(&json)
        .with_context(|| format!("invalid render request {}", request_path.display()))?;
    let base_dir = request_path.parent().unwrap_or_else(|| Path::new("."));
    let timeline = request
        .into_timeline(base_dir)
        .context("failed to build timeline")?;
    timeline.render_png().context("failed to render timeline")
}

pub fn run<W: Write>(writer: &mut W, request_path: &Path, output: &Path) -> Result<Vec<u8>> {
    let png = render_request(request_path)?;
    std::fs::write(output, &png).with_context(|| format!("failed to write {}", output.display()))?;
    writeln!(writer, "Wrote {} ({} bytes)", output.display(), png.len())?;
    Ok(png)
}

/// Posts a rendered timeline as a standalone message.
pub async fn post(
    sink: &dyn NotificationSink,
    target: ChannelId,
    description: &str,
    png: Vec<u8>,
) -> Result<MessageHandle> {
    let message = StatusMessage {
        report: StatusReport {
            title: "Call timeline".to_string(),
            description: description.to_string(),
            color: REPORT_COLOR,
            fields: Vec::new(),
            image: Some(ReportImage {
                url: format!("attachment://{TIMELINE_ATTACHMENT}"),
            }),
        },
        attachment: Some(Attachment {
            filename: TIMELINE_ATTACHMENT.to_string(),
            png,
        }),
    };
    sink.publish(target, message)
        .await
        .with_context(|| format!("failed to post timeline to channel {target}"))
}
