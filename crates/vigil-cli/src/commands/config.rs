/// Configuration file command handlers
use anyhow::Result;
use vigil_core::Config;

pub fn handle_config_show() -> Result<()> {
    let path = Config::default_path()?;
    let config = Config::load_from(&path)?;

    if !path.exists() {
        println!("# {} does not exist, showing defaults", path.display());
    }
    print!("{}", config.to_toml_string()?);
    Ok(())
}

pub fn handle_config_init(force: bool) -> Result<()> {
    let path = Config::default_path()?;
    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("Use --force to overwrite it with defaults.");
        return Ok(());
    }

    Config::default().save_to(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

pub fn handle_config_path() -> Result<()> {
    println!("{}", Config::default_path()?.display());
    Ok(())
}
