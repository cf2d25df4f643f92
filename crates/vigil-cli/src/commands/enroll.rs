/// Reference face enrollment
use anyhow::Result;
use std::path::Path;
use vigil_core::collab::{enroll, CommandEmbedder, DeviceCamera};
use vigil_core::Config;

pub async fn enroll_command(data_dir: &Path) -> Result<()> {
    if data_dir.join("vigil.sock").exists() {
        log::warn!("The daemon appears to be running and may hold the camera. Run `vigil stop` if capture fails.");
    }

    let config = Config::load()?;
    let path = config.matcher.reference_path()?;
    let camera = DeviceCamera::new(&config.camera);
    let embedder = CommandEmbedder::new(config.matcher.embedder_command.clone());

    println!("Look at the camera...");
    enroll(&camera, &embedder, &path).await?;
    println!("Reference face saved to {}", path.display());

    if data_dir.join("vigil.sock").exists() {
        println!("Restart the daemon to use the new reference: vigil stop && vigil start");
    }
    Ok(())
}
