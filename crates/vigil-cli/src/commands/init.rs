//! First-time setup: data directory, config file and database

use anyhow::{Context, Result};
use std::fs;
use vigil_core::config::{get_data_dir, get_log_dir};
use vigil_core::Config;
use vigil_storage::Database;

/// Initialize vigil
///
/// # Errors
///
/// Returns an error if the data directory, config file or database cannot be created
pub fn init_command() -> Result<()> {
    println!("Initializing Vigil...\n");

    // Step 1: Directories
    println!("Step 1/3: Data Directory");
    println!("{}", "-".repeat(40));
    let data_dir = get_data_dir()?;
    let log_dir = get_log_dir()?;
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create {}", log_dir.display()))?;
    println!("Data directory: {}", data_dir.display());
    println!("Event logs:     {}", log_dir.display());

    // Step 2: Config file
    println!("\nStep 2/3: Configuration");
    println!("{}", "-".repeat(40));
    let config_path = Config::default_path()?;
    if config_path.exists() {
        println!("Using existing config at {}", config_path.display());
    } else {
        Config::default().save_to(&config_path)?;
        println!("Wrote default config to {}", config_path.display());
    }

    // Step 3: Database
    println!("\nStep 3/3: Database Setup");
    println!("{}", "-".repeat(40));
    let db = Database::new(None)?;
    drop(db);
    println!("Database ready.");

    println!("\n========================================");
    println!("  Setup Complete!");
    println!("========================================");

    let reference = Config::load_from(&config_path)?.matcher.reference_path()?;
    if reference.exists() {
        println!("\nStart monitoring with: vigil start");
    } else {
        println!("\nNext, capture your face with: vigil enroll");
        println!("Then start monitoring with:  vigil start");
    }

    Ok(())
}
