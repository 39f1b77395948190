use parley_core::config::{AppConfig, LlmConfig, LoadOptions, ProviderFamily};
use parley_db::connect;
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code 0 when every check passes, 1 otherwise.
pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        })
    } else {
        render_human(&report)
    };
    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_provider_credentials(&config.llm));
            checks.push(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["provider_credentials", "database_readiness"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_provider_credentials(llm: &LlmConfig) -> DoctorCheck {
    let families = [ProviderFamily::Gemini, ProviderFamily::OpenAi];
    let configured: Vec<&str> = families
        .iter()
        .filter(|family| llm.api_key(**family).is_some())
        .map(|family| family.as_str())
        .collect();
    let missing: Vec<&str> = families
        .iter()
        .filter(|family| llm.api_key(**family).is_none())
        .map(|family| LlmConfig::api_key_setting(*family))
        .collect();

    if configured.is_empty() {
        return DoctorCheck {
            name: "provider_credentials",
            status: CheckStatus::Fail,
            details: format!("no model credentials; set {}", missing.join(" or ")),
        };
    }

    let mut details = format!("configured families: {}", configured.join(", "));
    if llm.api_key(llm.fallback_family).is_none() {
        details.push_str(&format!(
            "; fallback family `{}` has no key ({})",
            llm.fallback_family.as_str(),
            LlmConfig::api_key_setting(llm.fallback_family)
        ));
    }
    DoctorCheck { name: "provider_credentials", status: CheckStatus::Pass, details }
}

fn check_database(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_readiness",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;

        let schema: Result<i64, sqlx::Error> = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'agent'",
        )
        .fetch_one(&pool)
        .await;
        pool.close().await;

        match schema {
            Ok(1) => Ok(()),
            Ok(_) => Err("schema missing; run `parley migrate`".to_string()),
            Err(error) => Err(format!("schema query failed: {error}")),
        }
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "database_readiness",
            status: CheckStatus::Pass,
            details: format!("connected using `{}` and found the schema", config.database.url),
        },
        Err(details) => DoctorCheck { name: "database_readiness", status: CheckStatus::Fail, details },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use parley_core::config::{AppConfig, ProviderFamily};
    use secrecy::SecretString;

    use super::{check_provider_credentials, CheckStatus};

    #[test]
    fn missing_keys_name_both_settings() {
        let config = AppConfig::default();
        let check = check_provider_credentials(&config.llm);
        assert_eq!(check.status, CheckStatus::Fail);
        assert!(check.details.contains("llm.gemini_api_key or llm.openai_api_key"));
    }

    #[test]
    fn fallback_family_without_key_is_noted() {
        let mut config = AppConfig::default();
        config.llm.gemini_api_key = Some(SecretString::from("g-key".to_string()));
        config.llm.fallback_family = ProviderFamily::OpenAi;

        let check = check_provider_credentials(&config.llm);

        assert_eq!(check.status, CheckStatus::Pass);
        assert!(check.details.contains("configured families: gemini"));
        assert!(check.details.contains("llm.openai_api_key"));
    }
}
