use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::config::FeatureConfig;
use crate::dataset::{write_archive, Sample};
use crate::error::{Error, Result};
use crate::features::extract_segments;

/// One `path,speaker` line of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub speaker: String,
}

/// Parse `path,speaker` lines. Blank lines and `#` comments are skipped.
/// Relative paths are resolved against `base`.
pub fn parse_manifest(content: &str, base: &Path) -> Result<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (path, speaker) = line
            .rsplit_once(',')
            .map(|(p, s)| (p.trim(), s.trim()))
            .filter(|(p, s)| !p.is_empty() && !s.is_empty())
            .ok_or_else(|| Error::Manifest {
                line: i + 1,
                message: format!("expected `path,speaker`, got `{line}`"),
            })?;
        entries.push(ManifestEntry {
            path: base.join(path),
            speaker: speaker.to_owned(),
        });
    }
    Ok(entries)
}

/// Labeled samples ready to be archived.
#[derive(Debug)]
pub struct Corpus {
    pub samples: Vec<Sample>,
    /// Speaker name for each label id.
    pub speakers: Vec<String>,
    pub skipped: Vec<PathBuf>,
}

/// Extract feature slices for every manifest entry in parallel.
///
/// Speakers get contiguous ids in sorted name order. Files that cannot be
/// decoded are skipped with a warning.
pub fn build_corpus(entries: &[ManifestEntry], config: &FeatureConfig, progress: bool) -> Result<Corpus> {
    config.validate()?;
    let speakers: Vec<String> = entries
        .iter()
        .map(|e| e.speaker.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let pb = if progress {
        let pb = ProgressBar::new(entries.len() as u64);
        let style = ProgressStyle::default_bar()
            .template("{msg} {bar:40} {pos}/{len} ETA {eta}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_message("extracting features");
        pb
    } else {
        ProgressBar::hidden()
    };

    let results: Vec<(usize, &ManifestEntry, Result<_>)> = entries
        .par_iter()
        .map(|entry| {
            let label = speakers
                .binary_search(&entry.speaker)
                .unwrap_or_default();
            let segments = extract_segments(&entry.path, config);
            pb.inc(1);
            (label, entry, segments)
        })
        .collect();
    pb.finish_and_clear();

    let mut samples = Vec::new();
    let mut skipped = Vec::new();
    for (label, entry, segments) in results {
        match segments {
            Ok(segments) => {
                if segments.is_empty() {
                    log::debug!("{} is shorter than one segment", entry.path.display());
                }
                samples.extend(segments.into_iter().map(|features| Sample { label, features }));
            }
            Err(e) => {
                log::warn!("Skipping {}: {}", entry.path.display(), e);
                skipped.push(entry.path.clone());
            }
        }
    }
    log::info!(
        "extracted {} samples for {} speakers, skipped {} files",
        samples.len(),
        speakers.len(),
        skipped.len()
    );
    Ok(Corpus {
        samples,
        speakers,
        skipped,
    })
}

/// Read a manifest, extract features and write the training archive.
pub fn preprocess(manifest: &Path, output: &Path, config: &FeatureConfig) -> Result<Corpus> {
    let content = std::fs::read_to_string(manifest)?;
    let base = manifest.parent().unwrap_or_else(|| Path::new("."));
    let entries = parse_manifest(&content, base)?;
    let corpus = build_corpus(&entries, config, true)?;
    write_archive(output, &corpus.samples, &corpus.speakers)?;
    log::info!("wrote {}", output.display());
    Ok(corpus)
}
