use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use standings_forecast::config::PipelineConfig;
use standings_forecast::service::{PredictionRequest, PredictionService};
use standings_forecast::source::{SnapshotSource, TournamentCatalog};
use standings_forecast::store::{FileModelStore, ModelStore, SqliteModelStore};
use standings_forecast::synthetic::SyntheticLeague;
use standings_forecast::validator::Verdict;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = PipelineConfig::from_env();
    cfg.validate().context("invalid pipeline config")?;

    let catalog = if has_flag("--synthetic") || catalog_path_arg().is_none() {
        let mut league = SyntheticLeague::default();
        if let Some(rate) = parse_f64_arg("--upsets") {
            league.upset_rate = rate.clamp(0.0, 0.5);
        }
        league.seed = cfg.seed;
        league.catalog()
    } else {
        let path = catalog_path_arg().context("missing catalog path")?;
        TournamentCatalog::load(&path)?
    };

    let tournament_id = parse_str_arg("--tournament")
        .or_else(|| {
            catalog
                .upcoming()
                .first()
                .map(|snapshot| snapshot.tournament_id.clone())
        })
        .ok_or_else(|| anyhow!("no upcoming tournament in catalog; pass --tournament"))?;
    let as_of = catalog
        .current_snapshot(&tournament_id)
        .map_err(|e| anyhow!("{e}"))?
        .as_of;

    let store: Option<Box<dyn ModelStore>> = if let Some(path) = parse_str_arg("--sqlite") {
        Some(Box::new(SqliteModelStore::open(&PathBuf::from(path))?))
    } else if has_flag("--persist") {
        FileModelStore::default_location().map(|s| Box::new(s) as Box<dyn ModelStore>)
    } else {
        None
    };

    let mut service = PredictionService::new(catalog, cfg);
    if let Some(store) = store {
        service = service.with_store(store);
        if service.load_persisted()? {
            println!("Loaded persisted models");
        }
    }

    if has_flag("--retrain") {
        let summary = service.retrain(as_of)?;
        println!(
            "Retrained {:?} on {} rows (committed={}, persisted={})",
            summary.families, summary.training_rows, summary.committed, summary.persisted
        );
        for failure in &summary.failures {
            println!("  training failure: {failure}");
        }
    }

    let response = service.predict(&PredictionRequest::new(tournament_id))?;

    if has_flag("--json") {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("Tournament: {} (as of {})", response.tournament_id, response.as_of);
    println!("Models: {:?}", response.model_origin);
    if let Some(reason) = response.outcome.fallback_reason() {
        println!("FALLBACK: {reason}");
    }
    println!("  #  team               score   conf   source");
    for p in response.predictions() {
        println!(
            "{:>3}  {:<18} {:>6.2}  {:>5.2}   {}",
            p.rank, p.team_id, p.score, p.confidence, p.source_model
        );
    }
    if !response.excluded.is_empty() {
        println!("Excluded (no matches): {}", response.excluded.join(", "));
    }

    let report = &response.report;
    println!();
    println!("Validation samples: {}", report.samples);
    println!("  MAE: {:.3}  RMSE: {:.3}", report.mae, report.rmse);
    println!(
        "  ±1: {:.1}%  ±2: {:.1}%  ±3: {:.1}%  exact: {:.1}%  top-3: {:.1}%",
        report.accuracy_within_1 * 100.0,
        report.accuracy_within_2 * 100.0,
        report.accuracy_within_3 * 100.0,
        report.exact * 100.0,
        report.top3_accuracy * 100.0
    );
    for score in &report.model_scores {
        println!(
            "  {:<14} cv_mae={:.3} ± {:.3} ({})",
            score.family.label(),
            score.cv_score,
            score.cv_std,
            score.params
        );
    }
    match &report.verdict {
        Verdict::Pass => println!("Verdict: pass"),
        Verdict::Fail { reason } => println!("Verdict: fail ({reason})"),
    }
    println!("Digest: {}", response.digest);

    Ok(())
}

fn catalog_path_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let mut skip_next = false;
    for arg in &args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if matches!(arg.as_str(), "--tournament" | "--sqlite" | "--upsets") {
            skip_next = true;
            continue;
        }
        if !arg.starts_with("--") && !arg.trim().is_empty() {
            return Some(PathBuf::from(arg));
        }
    }
    None
}

fn parse_str_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && !raw.trim().is_empty()
        {
            return Some(raw.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn parse_f64_arg(name: &str) -> Option<f64> {
    parse_str_arg(name).and_then(|raw| raw.parse::<f64>().ok())
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
