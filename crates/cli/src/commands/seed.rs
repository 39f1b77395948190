use parley_db::{DemoSeedDataset, SeedResult};
use serde_json::json;

use crate::commands::{with_database, CommandResult, StepFailure};

pub fn run(reset: bool) -> CommandResult {
    let outcome = with_database("seed", |pool| async move {
        if reset {
            DemoSeedDataset::clean(&pool)
                .await
                .map_err(|error| ("seed_reset", error.to_string(), 6u8))?;
        }
        let seeded = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 6u8))?;
        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 7u8))?;

        if !verification.all_present {
            return Err(("seed_verification", failed_checks_message(&verification.checks), 7u8));
        }
        Ok::<SeedResult, StepFailure>(seeded)
    });

    match outcome {
        Ok(seeded) => CommandResult::success_with(
            "seed",
            format!(
                "demo tenant ready: agent `{}` in workspace `{}`, conversation `{}`",
                seeded.agent_id, seeded.workspace_id, seeded.conversation_id
            ),
            Some(json!({
                "workspace_id": seeded.workspace_id,
                "agent_id": seeded.agent_id,
                "conversation_id": seeded.conversation_id,
                "passages_seeded": seeded.passages_seeded,
            })),
        ),
        Err(failure) => failure,
    }
}

fn failed_checks_message(checks: &[(&'static str, bool)]) -> String {
    let failed: Vec<&str> =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect();
    if failed.is_empty() {
        "some demo data failed to load".to_string()
    } else {
        format!("demo data verification failed for: {}", failed.join(", "))
    }
}
