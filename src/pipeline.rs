//! Match pipeline orchestration.
//!
//! Runs the four stages strictly in order, one image at a time:
//!
//! ```text
//! provision ──▶ populate ──▶ match_images ──▶ Report::write
//! (collection)  (base keys)   (query keys)      (xlsx / csv)
//! ```
//!
//! Every remote call returns a typed `Result`. A failed call is logged and
//! the stage moves on to the next image; only writing the report can fail
//! a run.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::face_index::FaceIndex;
use crate::models::{IdentityRecord, ImageRef, MatchRecord};
use crate::object_store::{list_keys, ObjectStore};
use crate::report::{Report, WrittenReport};

/// What the pipeline needs from the configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub bucket: String,
    pub collection_id: String,
    pub base_prefix: String,
    pub query_prefix: String,
    pub similarity_threshold: f64,
    pub max_matches: u32,
    pub recreate_collection: bool,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            bucket: config.storage.bucket.clone(),
            collection_id: config.collection.id.clone(),
            base_prefix: config.storage.base_prefix.clone(),
            query_prefix: config.storage.query_prefix.clone(),
            similarity_threshold: config.matching.similarity_threshold,
            max_matches: config.matching.max_matches,
            recreate_collection: config.collection.recreate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    AlreadyExists,
    Failed(String),
}

impl std::fmt::Display for ProvisionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionOutcome::Created => write!(f, "created"),
            ProvisionOutcome::AlreadyExists => write!(f, "already exists (reused)"),
            ProvisionOutcome::Failed(e) => write!(f, "failed ({})", e),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopulationSummary {
    pub listed: usize,
    pub indexed: usize,
    pub failed: usize,
    pub faces_indexed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchingSummary {
    pub listed: usize,
    pub searched: usize,
    pub failed: usize,
    pub without_match: usize,
    pub matches: usize,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub provision: ProvisionOutcome,
    pub population: PopulationSummary,
    pub matching: MatchingSummary,
    pub report: WrittenReport,
}

/// The match pipeline, bound to its remote collaborators.
pub struct Pipeline<'a> {
    store: &'a dyn ObjectStore,
    faces: &'a dyn FaceIndex,
    settings: PipelineSettings,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        faces: &'a dyn FaceIndex,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            faces,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Make sure the collection exists. Never fails the run.
    ///
    /// With `recreate_collection`, the collection is deleted first so faces
    /// from earlier runs do not show up in this run's matches.
    pub async fn provision(&self) -> ProvisionOutcome {
        let id = self.settings.collection_id.as_str();

        if self.settings.recreate_collection {
            match self.faces.delete_collection(id).await {
                Ok(()) => tracing::info!(collection = id, "deleted existing collection"),
                Err(e) if e.is_not_found() => {
                    tracing::debug!(collection = id, "no existing collection to delete")
                }
                Err(e) => {
                    tracing::warn!(collection = id, error = %e, "failed to delete collection")
                }
            }
        }

        match self.faces.create_collection(id).await {
            Ok(()) => {
                tracing::info!(collection = id, "collection created");
                ProvisionOutcome::Created
            }
            Err(e) if e.is_already_exists() => {
                tracing::info!(collection = id, "collection already exists, reusing it");
                ProvisionOutcome::AlreadyExists
            }
            Err(e) => {
                tracing::error!(collection = id, error = %e, "failed to create collection");
                ProvisionOutcome::Failed(e.to_string())
            }
        }
    }

    /// Register every reference image under `base_prefix` in the collection.
    pub async fn populate(&self) -> PopulationSummary {
        let s = &self.settings;
        let keys = list_keys(self.store, &s.bucket, &s.base_prefix).await;
        let mut summary = PopulationSummary {
            listed: keys.len(),
            ..Default::default()
        };

        for key in &keys {
            let identity = IdentityRecord::from_key(key);
            let image = ImageRef::new(&s.bucket, &identity.source_key);

            match self
                .faces
                .index_faces(&s.collection_id, &image, &identity.external_id)
                .await
            {
                Ok(indexed) => {
                    if indexed.face_ids.is_empty() {
                        tracing::warn!(image = %image, "no face indexed");
                    } else {
                        tracing::info!(
                            image = %image,
                            external_id = %identity.external_id,
                            faces = indexed.face_ids.len(),
                            unindexed = indexed.unindexed,
                            "indexed reference image"
                        );
                    }
                    summary.indexed += 1;
                    summary.faces_indexed += indexed.face_ids.len();
                }
                Err(e) => {
                    tracing::warn!(image = %image, error = %e, "failed to index reference image");
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Search the collection with every image under `query_prefix`.
    ///
    /// Every match the service returns becomes one record; matches are not
    /// filtered again here.
    pub async fn match_images(&self, report: &mut Report) -> MatchingSummary {
        let s = &self.settings;
        let keys = list_keys(self.store, &s.bucket, &s.query_prefix).await;
        let mut summary = MatchingSummary {
            listed: keys.len(),
            ..Default::default()
        };

        for key in &keys {
            let image = ImageRef::new(&s.bucket, key);

            let matches = match self
                .faces
                .search_faces_by_image(
                    &s.collection_id,
                    &image,
                    s.similarity_threshold,
                    s.max_matches,
                )
                .await
            {
                Ok(matches) => matches,
                Err(e) => {
                    tracing::warn!(image = %image, error = %e, "face search failed");
                    summary.failed += 1;
                    continue;
                }
            };
            summary.searched += 1;

            if matches.is_empty() {
                tracing::info!(image = %key, "no match found");
                summary.without_match += 1;
                continue;
            }

            for face_match in &matches {
                tracing::info!(
                    base_image = %face_match.external_id,
                    game_time_image = %key,
                    confidence = face_match.similarity,
                    face_id = face_match.face_id.as_deref().unwrap_or("-"),
                    "match found"
                );
                report.push(MatchRecord::new(face_match, key));
                summary.matches += 1;
            }
        }

        summary
    }

    /// Run every stage and write the report to `output`.
    pub async fn run(&self, output: &Path) -> Result<RunSummary> {
        let provision = self.provision().await;
        let population = self.populate().await;

        let mut report = Report::new();
        let matching = self.match_images(&mut report).await;
        if report.is_empty() {
            tracing::info!(path = %output.display(), "no matches, writing header-only report");
        }

        let report = report.write(output)?;
        tracing::info!(path = %report.path.display(), rows = report.rows, "report written");

        Ok(RunSummary {
            provision,
            population,
            matching,
            report,
        })
    }
}

impl RunSummary {
    /// Print the run summary on stdout.
    pub fn print(&self, settings: &PipelineSettings) {
        println!("run {}", settings.collection_id);
        println!("  collection: {}", self.provision);
        println!(
            "  base images: {} listed, {} indexed, {} failed ({} faces)",
            self.population.listed,
            self.population.indexed,
            self.population.failed,
            self.population.faces_indexed
        );
        println!(
            "  game-time images: {} listed, {} searched, {} failed, {} without match",
            self.matching.listed,
            self.matching.searched,
            self.matching.failed,
            self.matching.without_match
        );
        println!("  matches: {}", self.matching.matches);
        println!("  report: {}", self.report.path.display());
        println!("ok");
    }
}
