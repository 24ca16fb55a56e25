use anyhow::Result;

fn main() -> Result<()> {
    relaunch::cli::run()
}
