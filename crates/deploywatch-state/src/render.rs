//! Line formatting for the rendered snapshot.

use deploywatch_core::{Deployment, InstanceStatus, LifecycleEvent, StatusSummary};

/// Width of the lifecycle event name column in verbose output.
const EVENT_NAME_WIDTH: usize = 20;

/// `d-1 app-group (2/3)`
pub fn deployment_line(deployment: &Deployment, succeeded: usize, total: usize) -> String {
    format!(
        "{} {}-{} ({}/{})\n",
        deployment.id, deployment.application, deployment.group, succeeded, total
    )
}

/// One compact line: padded name, id, accumulated duration, status and,
/// for blue/green deployments, the replacement role.
pub fn compact_instance_line(
    name: &str,
    instance_id: &str,
    summary: Option<&StatusSummary>,
    name_width: usize,
) -> String {
    let status = summary.map_or(&InstanceStatus::Pending, |s| &s.status);
    let duration = duration_str(summary.map_or(0, StatusSummary::total_duration_secs));
    let line = format!("  {name:<name_width$} ({instance_id}) {duration} {status}");
    with_role(line, summary)
}

/// Verbose instance header, `  name (id)`. Status and timing live on the
/// lifecycle event lines that follow.
pub fn instance_line(name: &str, instance_id: &str) -> String {
    format!("  {name} ({instance_id})\n")
}

pub fn lifecycle_event_line(event: &LifecycleEvent) -> String {
    format!(
        "    => {:<width$} {} {}\n",
        event.name,
        duration_str(event.duration_secs()),
        event.status,
        width = EVENT_NAME_WIDTH
    )
}

/// `%2dm%2ds`, e.g. ` 1m 5s`.
pub fn duration_str(secs: u64) -> String {
    format!("{:2}m{:2}s", secs / 60, secs % 60)
}

fn with_role(mut line: String, summary: Option<&StatusSummary>) -> String {
    if let Some(role) = summary.and_then(|s| s.instance_type) {
        line.push_str(&format!(" ({})", role.label()));
    }
    line.push('\n');
    line
}
