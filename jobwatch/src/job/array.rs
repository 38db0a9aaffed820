//! Array-job helpers: task-id specs and per-task output path resolution.

use crate::error::{JobwatchError, JobwatchResult};

/// Upper bound on the number of tasks one spec may expand to. Guards the
/// table against a corrupt log line such as `--array=0-4294967295`.
pub const MAX_EXPANDED_TASKS: usize = 100_000;

/// Expand an array spec such as `1-3`, `1,4,7-9` or `0-99%10` into task ids.
/// The `%limit` concurrency suffix is ignored.
pub fn parse_array_spec(spec: &str) -> JobwatchResult<Vec<u64>> {
    let mut tasks = Vec::new();
    for element in spec.split(',') {
        let element = match element.find('%') {
            Some(pos) => &element[..pos],
            None => element,
        };
        let element = element.trim();
        match element.split_once('-') {
            Some((start, end)) => {
                let start = parse_task_id(start, spec)?;
                let end = parse_task_id(end, spec)?;
                if start > end {
                    return Err(JobwatchError::parse(format!(
                        "array range '{}' runs backwards",
                        element
                    )));
                }
                let remaining = (MAX_EXPANDED_TASKS - tasks.len()) as u64;
                if (end - start).saturating_add(1) > remaining {
                    return Err(too_many_tasks(spec));
                }
                tasks.extend(start..=end);
            }
            None => tasks.push(parse_task_id(element, spec)?),
        }
        if tasks.len() > MAX_EXPANDED_TASKS {
            return Err(too_many_tasks(spec));
        }
    }
    Ok(tasks)
}

fn parse_task_id(raw: &str, spec: &str) -> JobwatchResult<u64> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(JobwatchError::parse(format!(
            "invalid task id '{}' in array spec '{}'",
            raw, spec
        )));
    }
    raw.parse()
        .map_err(|e| JobwatchError::parse(format!("task id '{}': {}", raw, e)))
}

fn too_many_tasks(spec: &str) -> JobwatchError {
    JobwatchError::parse(format!(
        "array spec '{}' expands to more than {} tasks",
        spec, MAX_EXPANDED_TASKS
    ))
}

/// Values substituted into stdout/stderr path templates.
#[derive(Debug, Clone, Copy)]
pub struct PathMacros<'a> {
    /// Submission id (`%A`, and `%j` for non-array jobs).
    pub job_id: &'a str,
    /// Task id (`%a`). `None` for non-array jobs.
    pub task_id: Option<u64>,
    /// Job name (`%x`).
    pub name: Option<&'a str>,
}

/// Resolve the filename macros the submission tool understands. Unknown
/// macros are left untouched; `%%` is a literal percent sign.
pub fn resolve_path_template(template: &str, macros: &PathMacros<'_>) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                out.push('%');
                chars.next();
            }
            Some('A') => {
                out.push_str(macros.job_id);
                chars.next();
            }
            Some('a') if macros.task_id.is_some() => {
                if let Some(task) = macros.task_id {
                    out.push_str(&task.to_string());
                }
                chars.next();
            }
            // For array tasks %j is the task's own scheduler id, which the
            // submission log never records.
            Some('j') if macros.task_id.is_none() => {
                out.push_str(macros.job_id);
                chars.next();
            }
            Some('x') if macros.name.is_some() => {
                if let Some(name) = macros.name {
                    out.push_str(name);
                }
                chars.next();
            }
            _ => out.push('%'),
        }
    }
    out
}
