use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

/// A calendar task as exported by the calendar front end.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarTask {
    pub id: i64,
    pub task_name: String,
    #[serde(default)]
    pub description: String,
    pub priority: Priority,
    #[serde(default)]
    pub project: String,
    /// ISO-8601, so lexical order is chronological.
    pub deadline: String,
    #[serde(default)]
    pub time_required: String,
}

pub async fn load_tasks(path: &Path) -> anyhow::Result<Vec<CalendarTask>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading tasks from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing tasks in {}", path.display()))
}

/// Most urgent first: priority, then deadline, then id.
pub fn sort_by_urgency(tasks: &mut [CalendarTask]) {
    tasks.sort_by(|a, b| {
        a.priority
            .rank()
            .cmp(&b.priority.rank())
            .then_with(|| a.deadline.cmp(&b.deadline))
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub fn build_prompt(tasks: &[CalendarTask]) -> String {
    let mut prompt = String::from(
        "You are a planning assistant. Here are my upcoming tasks, most urgent first:\n",
    );
    for (n, task) in tasks.iter().enumerate() {
        let _ = write!(
            prompt,
            "{}. [{:?}] {} ({}), due {}",
            n + 1,
            task.priority,
            task.task_name,
            if task.project.is_empty() { "no project" } else { task.project.as_str() },
            task.deadline,
        );
        if !task.time_required.is_empty() {
            let _ = write!(prompt, ", needs {}", task.time_required);
        }
        if !task.description.is_empty() {
            let _ = write!(prompt, ": {}", task.description);
        }
        prompt.push('\n');
    }
    prompt.push_str("Recommend what I should work on today and why:\n");
    prompt
}
