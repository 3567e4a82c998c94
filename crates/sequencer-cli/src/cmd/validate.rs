use crate::output::{print_json, print_table};
use crate::session::Session;
use std::path::Path;

pub fn run(config: &Path, file: &Path, json: bool) -> anyhow::Result<()> {
    let session = Session::load(config)?;
    let root = session.open(file)?;
    let issues = root.validate();

    if json {
        print_json(&serde_json::json!({
            "file": file.display().to_string(),
            "entities": root.entity_count(),
            "issues": issues,
        }))?;
    } else if issues.is_empty() {
        println!(
            "{} is valid ({} entities).",
            file.display(),
            root.entity_count()
        );
    } else {
        let rows = issues
            .iter()
            .map(|issue| {
                vec![
                    issue.name.clone(),
                    issue.discriminator.clone(),
                    issue.message.clone(),
                ]
            })
            .collect();
        print_table(&["NAME", "TYPE", "PROBLEM"], rows);
    }

    if !issues.is_empty() {
        anyhow::bail!(
            "{} has {} validation issue(s)",
            file.display(),
            issues.len()
        );
    }
    Ok(())
}
