use chrono::Duration;

use standings_forecast::config::PipelineConfig;
use standings_forecast::error::{ServiceError, SourceError};
use standings_forecast::fallback::{FALLBACK_SOURCE, FallbackReason};
use standings_forecast::records::{HistoricalTournament, Snapshot, Standing};
use standings_forecast::regressor::ModelFamily;
use standings_forecast::service::{ModelOrigin, PipelineState, PredictionRequest, PredictionService};
use standings_forecast::source::{CatalogEntry, SnapshotSource, TournamentCatalog};
use standings_forecast::store::{FileModelStore, MemoryModelStore, ModelStore};
use standings_forecast::synthetic::{SyntheticLeague, drop_matches_for};
use standings_forecast::trainer::ModelSet;
use standings_forecast::validator::{FailReason, ModelScore, Verdict};

fn team_order(predictions: &[standings_forecast::Prediction]) -> Vec<String> {
    predictions.iter().map(|p| p.team_id.clone()).collect()
}

#[test]
fn clean_league_ranks_every_team_by_strength() {
    let league = SyntheticLeague::default();
    let service = PredictionService::new(league.catalog(), PipelineConfig::default());
    let response = service
        .predict(&PredictionRequest::new(league.current_id()))
        .expect("prediction should succeed");

    assert!(response.report.verdict.is_pass(), "{:?}", response.report.verdict);
    assert_eq!(response.report.samples, 16);
    assert!(response.report.accuracy_within_1 >= 0.7);
    assert!(!response.fallback_used());
    assert!(response.excluded.is_empty());
    assert!(response.training_failures.is_empty());
    assert_eq!(response.model_origin, ModelOrigin::Transient);
    assert_eq!(
        response.trace,
        vec![
            PipelineState::Collecting,
            PipelineState::Featurizing,
            PipelineState::Training,
            PipelineState::Predicting,
            PipelineState::Validating,
            PipelineState::Done,
        ]
    );

    let predictions = response.predictions();
    assert_eq!(predictions.len(), 8);
    let ranks: Vec<usize> = predictions.iter().map(|p| p.rank).collect();
    assert_eq!(ranks, (1..=8).collect::<Vec<_>>());
    assert!(predictions.iter().all(|p| !p.fallback_used));
    assert!(predictions.iter().all(|p| (0.0..=1.0).contains(&p.confidence)));
    assert!(predictions.windows(2).all(|w| w[0].score <= w[1].score));
    assert_eq!(predictions[0].team_id, "team_01");
    assert_eq!(predictions[7].team_id, "team_08");
}

#[test]
fn team_without_matches_is_excluded_and_reported() {
    let league = SyntheticLeague::default();
    let mut catalog = league.catalog();
    let mut entry = catalog
        .get(&league.current_id())
        .cloned()
        .expect("current entry");
    drop_matches_for(&mut entry.snapshot, "team_05");
    catalog.add(entry);

    let service = PredictionService::new(catalog, PipelineConfig::default());
    let response = service
        .predict(&PredictionRequest::new(league.current_id()))
        .expect("prediction should succeed");

    assert_eq!(response.excluded, vec!["team_05".to_string()]);
    let predictions = response.predictions();
    assert_eq!(predictions.len(), 7);
    assert!(predictions.iter().all(|p| p.team_id != "team_05"));
    let ranks: Vec<usize> = predictions.iter().map(|p| p.rank).collect();
    assert_eq!(ranks, (1..=7).collect::<Vec<_>>());
}

#[test]
fn too_little_history_falls_back_to_win_rate() {
    let league = SyntheticLeague {
        teams: 3,
        history: 1,
        ..SyntheticLeague::default()
    };
    let cfg = PipelineConfig::default().with_families([ModelFamily::Ridge]);
    let service = PredictionService::new(league.catalog(), cfg.clone());
    let response = service
        .predict(&PredictionRequest::new(league.current_id()))
        .expect("fallback is not an error");

    assert_eq!(
        response.outcome.fallback_reason(),
        Some(&FallbackReason::NoModelAvailable)
    );
    assert_eq!(response.training_failures.len(), 1);
    let predictions = response.predictions();
    assert_eq!(team_order(predictions), vec!["team_01", "team_02", "team_03"]);
    for p in predictions {
        assert!(p.fallback_used);
        assert_eq!(p.source_model, FALLBACK_SOURCE);
        assert!(p.confidence <= cfg.fallback_confidence_cap);
    }
}

#[test]
fn failed_validation_forces_fallback_even_with_models() {
    // A single resolved tournament trains fine but leaves nothing to hold out.
    let league = SyntheticLeague {
        history: 1,
        ..SyntheticLeague::default()
    };
    let cfg = PipelineConfig::default();
    let service = PredictionService::new(league.catalog(), cfg.clone());
    let response = service
        .predict(&PredictionRequest::new(league.current_id()))
        .expect("prediction should succeed");

    assert!(response.training_failures.is_empty());
    assert_eq!(response.report.samples, 0);
    assert_eq!(
        response.report.verdict,
        Verdict::Fail {
            reason: FailReason::NoHoldout
        }
    );
    assert_eq!(
        response.outcome.fallback_reason(),
        Some(&FallbackReason::ValidationFailed {
            cause: FailReason::NoHoldout
        })
    );
    assert_eq!(response.predictions().len(), 8);
    assert!(response.predictions().iter().all(|p| p.fallback_used));
    assert!(
        response
            .predictions()
            .iter()
            .all(|p| p.confidence <= cfg.fallback_confidence_cap)
    );
}

#[test]
fn repeated_requests_give_identical_rankings() {
    let league = SyntheticLeague {
        upset_rate: 0.1,
        ..SyntheticLeague::default()
    };
    let service = PredictionService::new(league.catalog(), PipelineConfig::default());
    let request = PredictionRequest::new(league.current_id());
    let first = service.predict(&request).expect("first");
    let second = service.predict(&request).expect("second");
    assert_eq!(first.digest, second.digest);
    assert_eq!(first.predictions(), second.predictions());
}

#[test]
fn concurrent_requests_with_different_configs_do_not_interfere() {
    let league = SyntheticLeague::default();
    let service = PredictionService::new(league.catalog(), PipelineConfig::default());
    let all = PredictionRequest::new(league.current_id());
    let ridge = PredictionRequest::new(league.current_id())
        .with_config(PipelineConfig::default().with_families([ModelFamily::Ridge]));

    let expected_all = service.predict(&all).expect("all").digest;
    let expected_ridge = service.predict(&ridge).expect("ridge").digest;

    let (got_all, got_ridge) = std::thread::scope(|scope| {
        let a = scope.spawn(|| service.predict(&all).map(|r| r.digest));
        let b = scope.spawn(|| service.predict(&ridge).map(|r| r.digest));
        (a.join(), b.join())
    });
    assert_eq!(got_all.expect("join").expect("all"), expected_all);
    assert_eq!(got_ridge.expect("join").expect("ridge"), expected_ridge);
}

#[test]
fn late_resolved_tournament_never_reaches_training_or_validation() {
    let league = SyntheticLeague::default();
    let clean = league.catalog();
    let current = clean
        .current_snapshot(&league.current_id())
        .expect("current snapshot");

    let mut leaky = clean.clone();
    let standings = (0..league.teams)
        .map(|idx| Standing {
            team_id: SyntheticLeague::team_id(league.teams - 1 - idx),
            placement: idx as u32 + 1,
        })
        .collect();
    leaky.add(CatalogEntry::resolved(HistoricalTournament {
        snapshot: Snapshot {
            tournament_id: "split_late".to_string(),
            as_of: current.as_of - Duration::days(5),
            records: current.records.clone(),
        },
        // Resolved at the prediction snapshot itself.
        resolved_at: current.as_of,
        standings,
    }));

    let request = PredictionRequest::new(league.current_id());
    let baseline = PredictionService::new(clean, PipelineConfig::default())
        .predict(&request)
        .expect("clean");
    let response = PredictionService::new(leaky, PipelineConfig::default())
        .predict(&request)
        .expect("leaky catalog still predicts");

    assert!(
        response
            .report
            .details
            .iter()
            .all(|d| d.tournament_id != "split_late")
    );
    assert_eq!(response.digest, baseline.digest);
}

#[test]
fn retrained_models_are_reused_for_matching_requests() {
    let league = SyntheticLeague::default();
    let catalog = league.catalog();
    let as_of = catalog
        .current_snapshot(&league.current_id())
        .expect("current")
        .as_of;
    let transient = PredictionService::new(catalog.clone(), PipelineConfig::default())
        .predict(&PredictionRequest::new(league.current_id()))
        .expect("transient");

    let service = PredictionService::new(catalog, PipelineConfig::default());
    let summary = service.retrain(as_of).expect("retrain");
    assert!(summary.committed);
    assert!(!summary.persisted);
    assert_eq!(summary.training_rows, 24);
    assert_eq!(summary.families.len(), 3);

    let response = service
        .predict(&PredictionRequest::new(league.current_id()))
        .expect("registry prediction");
    assert_eq!(response.model_origin, ModelOrigin::Registry);
    assert_eq!(response.digest, transient.digest);

    let ridge_only = PredictionRequest::new(league.current_id())
        .with_config(PipelineConfig::default().with_families([ModelFamily::Ridge]));
    let response = service.predict(&ridge_only).expect("ridge prediction");
    assert_eq!(response.model_origin, ModelOrigin::Transient);
    assert_eq!(service.registry().snapshot().map(|s| s.models.len()), Some(3));
}

#[test]
fn committed_models_trained_under_other_settings_are_not_reused() {
    let league = SyntheticLeague::default();
    let catalog = league.catalog();
    let as_of = catalog
        .current_snapshot(&league.current_id())
        .expect("current")
        .as_of;
    let service = PredictionService::new(catalog, PipelineConfig::default());
    assert!(service.retrain(as_of).expect("retrain").committed);

    let mut folds = PipelineConfig::default();
    folds.cv_folds = 3;
    let mut alpha = PipelineConfig::default();
    alpha.hyperparams.ridge_alpha = vec![500.0];
    let mut recency = PipelineConfig::default();
    recency.recency_half_life_days = 2.0;

    for cfg in [folds, alpha, recency] {
        let response = service
            .predict(&PredictionRequest::new(league.current_id()).with_config(cfg))
            .expect("prediction");
        assert_eq!(response.model_origin, ModelOrigin::Transient);
    }
    let response = service
        .predict(&PredictionRequest::new(league.current_id()))
        .expect("default prediction");
    assert_eq!(response.model_origin, ModelOrigin::Registry);
}

#[test]
fn registry_report_scores_the_committed_models() {
    let league = SyntheticLeague::default();
    let catalog = league.catalog();
    let as_of = catalog
        .current_snapshot(&league.current_id())
        .expect("current")
        .as_of;
    let service = PredictionService::new(catalog, PipelineConfig::default());
    service.retrain(as_of).expect("retrain");
    let committed = service.registry().snapshot().expect("committed set");

    let response = service
        .predict(&PredictionRequest::new(league.current_id()))
        .expect("registry prediction");
    assert_eq!(response.model_origin, ModelOrigin::Registry);
    assert_eq!(response.report.model_scores, ModelScore::from_set(&committed));
    assert!(response.report.verdict.is_pass());
    assert!(
        response
            .predictions()
            .iter()
            .all(|p| p.source_model != FALLBACK_SOURCE)
    );
}

#[test]
fn retrain_without_any_model_keeps_the_committed_set() {
    let league = SyntheticLeague {
        history: 0,
        ..SyntheticLeague::default()
    };
    let catalog = league.catalog();
    let as_of = catalog
        .current_snapshot(&league.current_id())
        .expect("current")
        .as_of;
    let service = PredictionService::new(catalog, PipelineConfig::default());
    let summary = service.retrain(as_of).expect("retrain");
    assert!(!summary.committed);
    assert_eq!(summary.failures.len(), 3);
    assert!(service.registry().is_empty());
}

#[test]
fn persisted_models_survive_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("models.json");
    let league = SyntheticLeague::default();
    let catalog = league.catalog();
    let as_of = catalog
        .current_snapshot(&league.current_id())
        .expect("current")
        .as_of;
    let request = PredictionRequest::new(league.current_id());

    let first = PredictionService::new(catalog.clone(), PipelineConfig::default())
        .with_store(Box::new(FileModelStore::new(path.clone())));
    assert!(!first.load_persisted().expect("empty store"));
    let summary = first.retrain(as_of).expect("retrain");
    assert!(summary.persisted);
    let before = first.predict(&request).expect("predict before restart");

    let second = PredictionService::new(catalog, PipelineConfig::default())
        .with_store(Box::new(FileModelStore::new(path)));
    assert!(second.load_persisted().expect("load"));
    let after = second.predict(&request).expect("predict after restart");
    assert_eq!(after.model_origin, ModelOrigin::Registry);
    assert_eq!(team_order(after.predictions()), team_order(before.predictions()));
}

#[test]
fn persisted_set_with_other_features_is_rejected() {
    let mut stale = ModelSet::empty();
    stale.feature_names = vec!["elo".to_string(), "win_rate".to_string()];
    let store = MemoryModelStore::new();
    store
        .store(&stale.to_blob().expect("serialize"))
        .expect("store");

    let league = SyntheticLeague::default();
    let service = PredictionService::new(league.catalog(), PipelineConfig::default())
        .with_store(Box::new(store));
    let err = service.load_persisted().unwrap_err();
    assert!(matches!(err, ServiceError::SchemaMismatch { .. }));
    assert!(service.registry().is_empty());
}

#[test]
fn partial_training_failure_policy() {
    let league = SyntheticLeague::default();
    let mut cfg = PipelineConfig::default();
    cfg.hyperparams.forest_n_estimators = vec![0];

    let service = PredictionService::new(league.catalog(), cfg.clone());
    let strict = service
        .predict(&PredictionRequest::new(league.current_id()))
        .expect("strict");
    assert_eq!(strict.training_failures.len(), 1);
    assert_eq!(
        strict.outcome.fallback_reason(),
        Some(&FallbackReason::MissingFamilies {
            families: vec![ModelFamily::RandomForest]
        })
    );
    assert!(strict.predictions().iter().all(|p| p.fallback_used));

    let mut lenient = cfg;
    lenient.fallback_on_partial_training_failure = false;
    let response = service
        .predict(&PredictionRequest::new(league.current_id()).with_config(lenient))
        .expect("lenient");
    assert_eq!(response.training_failures.len(), 1);
    assert!(!response.fallback_used());
    assert!(
        response
            .report
            .model_scores
            .iter()
            .all(|s| s.family != ModelFamily::RandomForest)
    );
}

#[test]
fn snapshot_without_matches_ranks_nobody() {
    let league = SyntheticLeague::default();
    let mut catalog = league.catalog();
    let mut entry = catalog
        .get(&league.current_id())
        .cloned()
        .expect("current entry");
    for idx in 0..league.teams {
        drop_matches_for(&mut entry.snapshot, &SyntheticLeague::team_id(idx));
    }
    catalog.add(entry);

    let service = PredictionService::new(catalog, PipelineConfig::default());
    let response = service
        .predict(&PredictionRequest::new(league.current_id()))
        .expect("an unrankable league is not an error");

    assert!(response.predictions().is_empty());
    assert_eq!(response.excluded.len(), league.teams);
    assert_eq!(
        response.outcome.fallback_reason(),
        Some(&FallbackReason::NoEligibleTeams)
    );
    assert_eq!(
        response.report.verdict,
        Verdict::Fail {
            reason: FailReason::NoEligibleTeams
        }
    );
    assert_eq!(response.trace.last(), Some(&PipelineState::Done));
}

#[test]
fn source_failure_reports_the_states_it_went_through() {
    let league = SyntheticLeague::default();
    let service = PredictionService::new(league.catalog(), PipelineConfig::default());
    let err = service
        .predict(&PredictionRequest::new("split_99"))
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Source {
            source: SourceError::UnknownTournament(_),
            ..
        }
    ));
    assert_eq!(
        err.trace(),
        Some(&[PipelineState::Collecting, PipelineState::Failed][..])
    );

    let err = service
        .predict(&PredictionRequest::new(league.current_id()).with_config({
            let mut cfg = PipelineConfig::default();
            cfg.cv_folds = 1;
            cfg
        }))
        .unwrap_err();
    assert_eq!(err.trace(), None);
}

#[test]
fn invalid_request_config_is_rejected_up_front() {
    let league = SyntheticLeague::default();
    let service = PredictionService::new(league.catalog(), PipelineConfig::default());
    let mut cfg = PipelineConfig::default();
    cfg.cv_folds = 1;
    let err = service
        .predict(&PredictionRequest::new(league.current_id()).with_config(cfg))
        .unwrap_err();
    assert!(matches!(err, ServiceError::Config(_)));
}

#[test]
fn catalog_json_round_trip_feeds_the_service() {
    let league = SyntheticLeague {
        teams: 6,
        ..SyntheticLeague::default()
    };
    let raw = league.catalog().to_json_string().expect("serialize catalog");
    let catalog = TournamentCatalog::from_json_str(&raw).expect("parse catalog");
    assert_eq!(catalog.historical().len(), 3);
    assert_eq!(catalog.upcoming().len(), 1);

    let response = PredictionService::new(catalog, PipelineConfig::default())
        .predict(&PredictionRequest::new(league.current_id()))
        .expect("predict");
    assert_eq!(response.predictions().len(), 6);
}
