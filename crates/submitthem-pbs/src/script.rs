//! Render `qsub` submission scripts.

use submitthem_core::{ConfigurationError, LogStream, ScriptRequest, log_template};
use submitthem_parsers::{format_pbs_duration, format_pbs_memory};

/// Build the submission script for one job, or one array of `map_count` tasks.
///
/// Pure: nothing is written and nothing is submitted. Fields missing from the
/// config produce no directive. The `select` resource is always requested.
pub fn build_script(request: &ScriptRequest<'_>) -> Result<String, ConfigurationError> {
    let config = request.config;

    let parallelism = match (request.array_parallelism, request.map_count) {
        (Some(_), None) => return Err(ConfigurationError::ParallelismWithoutMapCount),
        (explicit, _) => explicit.or(config.array_parallelism),
    };
    if parallelism == Some(0) {
        return Err(ConfigurationError::NonPositiveParallelism);
    }
    let array_size = request.map_count.filter(|count| *count > 1);

    let mut directives: Vec<String> = Vec::new();

    let name = config.job_name.as_deref().unwrap_or(request.job_name);
    if !name.is_empty() {
        directives.push(format!("-N {}", name));
    }

    if let Some(count) = array_size {
        let mut range = format!("-J 0-{}", count - 1);
        if let Some(cap) = parallelism {
            range.push_str(&format!("%{}", cap));
        }
        directives.push(range);
    }

    if let Some(partition) = &config.partition {
        directives.push(format!("-q {}", partition));
    }

    let mut select = format!(
        "-l select={}:ncpus={}",
        config.nodes.unwrap_or(1),
        config.cpus_per_task.unwrap_or(1)
    );
    if let Some(mem_gb) = config.mem_gb {
        select.push_str(&format!(":mem={}", format_pbs_memory(mem_gb)));
    }
    if let Some(gpus) = config.gpus_per_node {
        select.push_str(&format!(":ngpus={}", gpus));
    }
    directives.push(select);

    if let Some(walltime) = config.walltime() {
        directives.push(format!("-l walltime={}", format_pbs_duration(&walltime)));
    }

    if let Some(constraint) = &config.constraint {
        directives.push(format!("-l place={}", constraint));
    }

    let is_array = array_size.is_some();
    let stdout = log_template(request.folder, is_array, LogStream::Stdout);
    let stderr = log_template(request.folder, is_array, LogStream::Stderr);
    directives.push(format!("-o {}", stdout));
    directives.push(format!("-e {}", stderr));

    if !config.environment.is_empty() {
        let vars: Vec<String> = config
            .environment
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        directives.push(format!("-v {}", vars.join(",")));
    }

    // BTreeMap iteration keeps these sorted by flag.
    for (flag, value) in &config.additional_parameters {
        let flag = flag.trim_start_matches('-');
        if value.is_empty() {
            directives.push(format!("-{}", flag));
        } else {
            directives.push(format!("-{} {}", flag, value));
        }
    }

    let mut lines = vec!["#!/bin/bash".to_string(), String::new(), "# Parameters".to_string()];
    lines.extend(directives.iter().map(|d| format!("#PBS {}", d)));
    if let Some(comment) = &config.comment {
        lines.push(format!("# comment: {}", comment));
    }

    lines.push(String::new());
    lines.push("# command".to_string());
    lines.push(format!("export SUBMITTHEM_FOLDER={}", shell_quote(request.folder.as_str())));
    lines.push(request.command.to_string());
    lines.push(String::new());

    Ok(lines.join("\n"))
}

fn shell_quote(s: &str) -> String {
    if s.chars().all(|c| c.is_ascii_alphanumeric() || "/._-+:@%".contains(c)) {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}
