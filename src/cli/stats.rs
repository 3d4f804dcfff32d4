use anyhow::Result;

use photo_dedup::config::DedupConfig;
use photo_dedup::media::library;

/// Display local library statistics in the terminal.
pub fn stats(config: &DedupConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = photo_dedup::db::open_database(&db_path)?;
    let user_id = &config.storage.user_id;

    let stats = library::library_stats(&conn, user_id)?;

    println!("Library Statistics ({user_id})");
    println!("{}", "=".repeat(40));
    println!("  Media items:         {}", stats.total);
    println!("  Photos:              {}", stats.photos);
    println!("  Videos:              {}", stats.videos);
    println!();
    println!("  Images cached:       {}", stats.cached);
    println!("  Sizes known:         {}", stats.sized);

    let pending = stats.total.saturating_sub(stats.cached);
    if pending > 0 {
        println!();
        println!("{pending} images still to cache; `photo-dedup run` resumes where it stopped.");
    }

    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
    println!("Database size:         {db_size} bytes");

    Ok(())
}
