use crate::output::{print_json, print_tree, tree};
use crate::session::Session;
use std::path::Path;

pub fn run(config: &Path, file: &Path, json: bool) -> anyhow::Result<()> {
    let session = Session::load(config)?;
    let root = session.open(file)?;
    let rows = tree(&root);

    if json {
        print_json(&rows)?;
    } else {
        print_tree(&rows);
    }
    Ok(())
}
