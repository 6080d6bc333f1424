//! Backends command

use anyhow::Result;

pub fn run() -> Result<()> {
    print!("{}", frost::describe_backends());
    Ok(())
}
