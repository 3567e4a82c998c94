use crate::output::{print_json, print_table};
use crate::session::Session;
use std::path::Path;

pub fn run(config: &Path, json: bool) -> anyhow::Result<()> {
    let session = Session::load(config)?;
    let mut types = session.registry.discriminators();
    types.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));

    if json {
        let items: Vec<_> = types
            .iter()
            .map(|(name, kind)| serde_json::json!({ "type": name, "kind": kind }))
            .collect();
        print_json(&items)?;
        return Ok(());
    }

    let rows = types
        .iter()
        .map(|(name, kind)| vec![kind.to_string(), name.to_string()])
        .collect();
    print_table(&["KIND", "TYPE"], rows);
    Ok(())
}
