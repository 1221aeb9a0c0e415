use clap::Parser;
use media_dedups::config::DedupConfig;
use media_dedups::media_file::IdentityMode;
use media_dedups::resolution::{KeepStrategy, RemovalAction};
use media_dedups::visual_fingerprint::HashAlgorithm;
use media_dedups::Cli;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_config_defaults() {
    let config = DedupConfig::default();

    assert_eq!(config.threshold, 4);
    assert_eq!(config.algorithm, "phash");
    assert_eq!(config.keep, "largest");
    assert_eq!(config.identity, "metadata");
    assert_eq!(config.format, "json");
    assert_eq!(config.timeout_secs, 60);
    assert!(!config.audio);
    assert!(config.exclude.is_empty());
    assert!(config.prefer.is_empty());
    assert_eq!(config.parallel, None);
    assert!(!config.progress);
}

#[test]
fn test_save_and_load_config() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("test_mediadeduprc");

    let mut config = DedupConfig::default();
    config.threshold = 8;
    config.algorithm = "dhash".to_string();
    config.parallel = Some(4);
    config.exclude = vec!["**/thumbs/**".to_string()];
    config.prefer = vec![PathBuf::from("/photos/originals")];

    config.save_to_path(&config_path)?;

    assert!(config_path.exists());
    let content = fs::read_to_string(&config_path)?;
    assert!(content.contains("algorithm = \"dhash\""));
    assert!(content.contains("parallel = 4"));

    let loaded = DedupConfig::load_from_path(&config_path)?;
    assert_eq!(loaded.threshold, 8);
    assert_eq!(loaded.algorithm, "dhash");
    assert_eq!(loaded.parallel, Some(4));
    assert_eq!(loaded.exclude, vec!["**/thumbs/**"]);
    assert_eq!(loaded.prefer, vec![PathBuf::from("/photos/originals")]);

    // untouched values keep their defaults
    assert_eq!(loaded.keep, "largest");
    assert_eq!(loaded.format, "json");

    Ok(())
}

#[test]
fn test_partial_config_file_fills_in_defaults() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("partial.toml");
    fs::write(&config_path, "threshold = 12\naudio = true\n")?;

    let config = DedupConfig::load_from_path(&config_path)?;
    assert_eq!(config.threshold, 12);
    assert!(config.audio);
    assert_eq!(config.algorithm, "phash");
    assert_eq!(config.flush_every, 100);

    Ok(())
}

#[test]
fn test_nonexistent_config() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let nonexistent_path = temp_dir.path().join("nonexistent_config");

    let config = DedupConfig::load_from_path(&nonexistent_path)?;
    assert_eq!(config.algorithm, "phash");
    assert_eq!(config.keep, "largest");

    Ok(())
}

#[test]
fn test_create_default_if_not_exists() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join(".mediadeduprc");

    // Keep the real user's config out of the test
    std::env::set_var("HOME", temp_dir.path());

    let create_result = DedupConfig::create_default_if_not_exists();
    assert!(create_result.is_ok());
    assert!(config_path.exists());

    let second_result = DedupConfig::create_default_if_not_exists();
    assert!(second_result.is_ok());
    assert!(!second_result.unwrap());

    Ok(())
}

#[test]
fn test_custom_config_file() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let custom_config_path = temp_dir.path().join("custom_config.toml");

    let mut custom_config = DedupConfig::default();
    custom_config.algorithm = "dhash".to_string();
    custom_config.parallel = Some(2);
    custom_config.progress = true;
    custom_config.save_to_path(&custom_config_path)?;

    let args = vec![
        "media-dedups",
        "/media",
        "--config-file",
        custom_config_path.to_str().unwrap(),
    ];
    let cli = Cli::try_parse_from(args)?;

    assert_eq!(
        cli.config_file.as_deref(),
        Some(custom_config_path.as_path())
    );

    // with_config() reads the process args, so load the file directly
    let config = DedupConfig::load_from_path(&custom_config_path)?;
    assert_eq!(config.algorithm, "dhash");
    assert_eq!(config.parallel, Some(2));
    assert!(config.progress);

    Ok(())
}

#[test]
fn test_command_line_overrides_config() -> anyhow::Result<()> {
    let mut config = DedupConfig::default();
    config.threshold = 9;
    config.keep = "newest_modified".to_string();
    config.algorithm = "dhash".to_string();
    config.identity = "content".to_string();
    config.parallel = Some(3);
    config.exclude = vec!["*.tmp.jpg".to_string()];
    config.prefer_numbered_names = true;

    let mut cli = Cli::try_parse_from(["media-dedups", "/media", "-t", "2", "--parallel", "6"])?;
    cli.apply_config(config);
    let options = cli.to_options()?;

    let grouping = &options.pipeline.grouping;
    assert_eq!(grouping.thresholds.max_hamming, 2);
    assert_eq!(options.pipeline.workers, 6);
    assert_eq!(options.pipeline.policy.strategy, KeepStrategy::NewestModified);
    assert_eq!(options.extractor.algorithm, HashAlgorithm::DHash);
    assert_eq!(options.pipeline.identity, IdentityMode::Content);
    assert_eq!(options.pipeline.scan.excludes, vec!["*.tmp.jpg"]);
    assert!(options.pipeline.policy.prefer_numbered_names);

    Ok(())
}

#[test]
fn test_removal_requires_an_explicit_action() -> anyhow::Result<()> {
    let report_only = Cli::try_parse_from(["media-dedups", "/media"])?.to_options()?;
    assert!(report_only.dry_run());

    let delete = Cli::try_parse_from(["media-dedups", "/media", "--delete"])?.to_options()?;
    assert!(!delete.dry_run());
    assert_eq!(delete.removal_action(), &RemovalAction::Delete);

    let rehearsal =
        Cli::try_parse_from(["media-dedups", "/media", "--delete", "--dry-run"])?.to_options()?;
    assert!(rehearsal.dry_run());

    let moved = Cli::try_parse_from(["media-dedups", "/media", "-M", "/quarantine"])?.to_options()?;
    assert!(!moved.dry_run());
    assert_eq!(
        moved.removal_action(),
        &RemovalAction::MoveTo(PathBuf::from("/quarantine"))
    );

    Ok(())
}

#[test]
fn test_invalid_keep_strategy_in_config_is_an_error() {
    let mut config = DedupConfig::default();
    config.keep = "random".to_string();

    let mut cli = Cli::try_parse_from(["media-dedups", "/media"]).unwrap();
    cli.apply_config(config);
    assert!(cli.to_options().is_err());
}
