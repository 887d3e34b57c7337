use crate::job::JobParameters;

/// Single-quote `s` for `sh`.
fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Render the job script executed in the scratch directory.
///
/// The script clones the remote, checks out the requested ref, and runs the
/// benchmarks matching the filter, writing the benchmark lines to
/// `results.txt` next to the checkout. The worker captures the script's
/// combined output as the log artifact and the script text itself as the
/// script artifact, so the exact commands are always reproducible.
pub fn render_script(params: &JobParameters) -> String {
    let mut script = String::from("#!/bin/sh\nset -e\nset -x\n\n");
    script.push_str(&format!(
        "git clone {} checkout\n",
        sh_quote(&params.git_remote)
    ));
    script.push_str("cd checkout\n");
    script.push_str(&format!(
        "git checkout --detach {}\n\n",
        sh_quote(&params.git_ref)
    ));
    script.push_str(&format!(
        "go test -run NONE -bench {} -benchtime {}s -timeout {}s ./... | tee ../results.txt\n",
        sh_quote(&params.tests_filter_expr),
        params.bench_time.as_secs().max(1),
        params.timeout.as_secs().max(1),
    ));
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_quotes_parameters() {
        let params = JobParameters {
            git_remote: "https://example.com/repo.git".to_string(),
            git_ref: "v1.2.3".to_string(),
            tests_filter_expr: "BenchmarkKV.*".to_string(),
            ..Default::default()
        };
        let script = render_script(&params);
        assert!(script.starts_with("#!/bin/sh"));
        assert!(script.contains("git clone 'https://example.com/repo.git' checkout"));
        assert!(script.contains("git checkout --detach 'v1.2.3'"));
        assert!(script.contains("-bench 'BenchmarkKV.*'"));
        assert!(script.contains("tee ../results.txt"));
    }

    #[test]
    fn script_escapes_single_quotes() {
        let params = JobParameters {
            git_ref: "it's".to_string(),
            ..Default::default()
        };
        let script = render_script(&params);
        assert!(script.contains(r"'it'\''s'"));
    }
}
