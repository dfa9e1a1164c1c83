//! Textual rendering of a task and its output.

use super::task::BackgroundTask;

/// Render a task's status, recent output and outcome.
///
/// Shared by the management tools and the completion notification, so the
/// model sees the same shape whichever path delivers it.
pub fn build_task_result(task: &BackgroundTask, output: Option<&str>) -> String {
    let status = task.status();
    let output = output.filter(|o| !o.is_empty());
    let finished = status.is_terminal();

    if output.is_none() && !finished {
        return format!(
            "Task {} ({}, {}): No output yet.",
            task.task_id(),
            task.tool_name(),
            status
        );
    }

    let mut text = format!("Task {} ({}, {}):\n", task.task_id(), task.tool_name(), status);
    if let Some(output) = output {
        text.push_str(&format!("\n{output}\n"));
    }
    if finished {
        if let Some(result) = task.result() {
            text.push_str(&format!("\n[FINAL RESULT]\n{result}"));
        } else if let Some(error) = task.error() {
            text.push_str(&format!("\n[ERROR]\n{error}"));
        }
    }
    text
}
