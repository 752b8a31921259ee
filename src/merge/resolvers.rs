//! merge::resolvers
//!
//! Pluggable conflict resolution for the rebase machinery.
//!
//! # Contract
//!
//! A [`ConflictResolver`] receives the workspace and the conflicted paths
//! and reports which it resolved, with optional per-file errors. The rebase
//! loop enforces the contract:
//!
//! - any reported error aborts with `ConflictResolutionFailed`
//! - any conflicted file left unreported aborts with `UnresolvedConflicts`
//! - every resolved file is staged and committed before the rebase
//!   continues
//!
//! Resolvers are plain values behind `Arc<dyn ConflictResolver>`; compose
//! them by wrapping (see [`ChainResolver`]) rather than by building
//! hierarchies.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ForgeError;
use crate::git::Workspace;

/// What a resolver did with the conflicted files it was handed.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Files whose working-tree contents are now resolved
    pub resolved: Vec<String>,
    /// Per-file failure reports; any entry fails the rebase
    pub errors: Vec<String>,
}

impl Resolution {
    /// A resolution that handled nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A resolution that handled exactly `files`.
    pub fn of(files: impl IntoIterator<Item = String>) -> Self {
        Self {
            resolved: files.into_iter().collect(),
            errors: Vec::new(),
        }
    }
}

/// Converts a set of conflicted files into a set of resolved files.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    /// Resolve as many of `conflicted` as this resolver knows how to.
    ///
    /// Returning an `Err` aborts the rebase outright; per-file problems
    /// belong in [`Resolution::errors`] instead.
    async fn resolve(
        &self,
        workspace: &Workspace,
        conflicted: &[String],
    ) -> Result<Resolution, ForgeError>;
}

/// The default resolver: resolves nothing, so any conflict surfaces as
/// `UnresolvedConflicts`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

#[async_trait]
impl ConflictResolver for NoopResolver {
    async fn resolve(
        &self,
        _workspace: &Workspace,
        _conflicted: &[String],
    ) -> Result<Resolution, ForgeError> {
        Ok(Resolution::empty())
    }
}

/// Resolves every conflict by taking the union of both sides.
///
/// For each conflicted file the common ancestor, our side, and their side
/// are recovered from index stages 1/2/3, merged with
/// `git merge-file --union`, and the result written back to the working
/// tree. Files missing a side (delete/modify conflicts) are reported as
/// errors rather than guessed at.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnionResolver;

#[async_trait]
impl ConflictResolver for UnionResolver {
    async fn resolve(
        &self,
        workspace: &Workspace,
        conflicted: &[String],
    ) -> Result<Resolution, ForgeError> {
        let git = workspace.git();
        let mut resolution = Resolution::empty();

        for file in conflicted {
            let ours = git.show_stage(2, file).await.map_err(ForgeError::from)?;
            let theirs = git.show_stage(3, file).await.map_err(ForgeError::from)?;
            let (Some(ours), Some(theirs)) = (ours, theirs) else {
                resolution
                    .errors
                    .push(format!("{}: conflict deletes one side, union is undefined", file));
                continue;
            };
            // Add/add conflicts have no stage 1; an empty ancestor unions
            // to both sides' full contents.
            let common = git
                .show_stage(1, file)
                .await
                .map_err(ForgeError::from)?
                .unwrap_or_default();

            let staging = tempfile::tempdir().map_err(|e| {
                ForgeError::other(format!("failed to create staging dir: {}", e))
            })?;
            let ours_path = staging.path().join("ours");
            let common_path = staging.path().join("common");
            let theirs_path = staging.path().join("theirs");
            tokio::fs::write(&ours_path, &ours)
                .await
                .map_err(|e| ForgeError::other(format!("{}: {}", file, e)))?;
            tokio::fs::write(&common_path, &common)
                .await
                .map_err(|e| ForgeError::other(format!("{}: {}", file, e)))?;
            tokio::fs::write(&theirs_path, &theirs)
                .await
                .map_err(|e| ForgeError::other(format!("{}: {}", file, e)))?;

            match git
                .merge_file_union(&ours_path, &common_path, &theirs_path)
                .await
            {
                Ok(merged) => {
                    tokio::fs::write(workspace.path().join(file), merged)
                        .await
                        .map_err(|e| ForgeError::other(format!("{}: {}", file, e)))?;
                    resolution.resolved.push(file.clone());
                }
                Err(e) => resolution.errors.push(format!("{}: {}", file, e)),
            }
        }

        Ok(resolution)
    }
}

/// Resolves conflicts in `kustomization.yaml` files by taking our side and
/// appending a resource entry.
///
/// Conflicted files with any other name are left unresolved. The
/// `resources:` list ends up sorted and deduplicated, so concurrent
/// appenders converge on the same file regardless of arrival order.
#[derive(Debug, Clone)]
pub struct KustomizeResolver {
    /// The resource name to guarantee in `resources:`
    resource: String,
}

impl KustomizeResolver {
    /// A resolver that appends `resource`.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
        }
    }
}

#[async_trait]
impl ConflictResolver for KustomizeResolver {
    async fn resolve(
        &self,
        workspace: &Workspace,
        conflicted: &[String],
    ) -> Result<Resolution, ForgeError> {
        let mut resolution = Resolution::empty();

        for file in conflicted {
            if Path::new(file).file_name().and_then(|n| n.to_str()) != Some("kustomization.yaml") {
                continue;
            }

            if let Err(e) = workspace.git().checkout_ours(file).await {
                resolution.errors.push(format!("{}: {}", file, e));
                continue;
            }

            let full_path = workspace.path().join(file);
            let text = match tokio::fs::read_to_string(&full_path).await {
                Ok(text) => text,
                Err(e) => {
                    resolution.errors.push(format!("{}: {}", file, e));
                    continue;
                }
            };

            match append_kustomize_resource(&text, &self.resource) {
                Ok(updated) => {
                    if let Err(e) = tokio::fs::write(&full_path, updated).await {
                        resolution.errors.push(format!("{}: {}", file, e));
                        continue;
                    }
                    resolution.resolved.push(file.clone());
                }
                Err(e) => resolution.errors.push(format!("{}: {}", file, e)),
            }
        }

        Ok(resolution)
    }
}

/// Append `resource` to a kustomization document's `resources:` list,
/// sorting and deduplicating the result.
fn append_kustomize_resource(text: &str, resource: &str) -> Result<String, String> {
    let mut doc: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| format!("invalid yaml: {}", e))?;

    let mapping = doc
        .as_mapping_mut()
        .ok_or_else(|| "kustomization is not a mapping".to_string())?;

    let key = serde_yaml::Value::from("resources");
    let mut names: BTreeSet<String> = match mapping.get(&key) {
        Some(serde_yaml::Value::Sequence(seq)) => seq
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| "resources entry is not a string".to_string())
            })
            .collect::<Result<_, _>>()?,
        Some(serde_yaml::Value::Null) | None => BTreeSet::new(),
        Some(_) => return Err("resources is not a list".to_string()),
    };
    names.insert(resource.to_string());

    mapping.insert(
        key,
        serde_yaml::Value::Sequence(names.into_iter().map(serde_yaml::Value::from).collect()),
    );

    serde_yaml::to_string(&doc).map_err(|e| format!("failed to render yaml: {}", e))
}

/// Runs each wrapped resolver over the files the previous ones left
/// unresolved, merging the reports.
#[derive(Clone, Default)]
pub struct ChainResolver {
    resolvers: Vec<Arc<dyn ConflictResolver>>,
}

impl ChainResolver {
    /// An empty chain (equivalent to [`NoopResolver`]).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver to the chain.
    pub fn then(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }
}

#[async_trait]
impl ConflictResolver for ChainResolver {
    async fn resolve(
        &self,
        workspace: &Workspace,
        conflicted: &[String],
    ) -> Result<Resolution, ForgeError> {
        let mut remaining: Vec<String> = conflicted.to_vec();
        let mut combined = Resolution::empty();

        for resolver in &self.resolvers {
            if remaining.is_empty() {
                break;
            }
            let resolution = resolver.resolve(workspace, &remaining).await?;
            remaining.retain(|f| !resolution.resolved.contains(f));
            combined.resolved.extend(resolution.resolved);
            combined.errors.extend(resolution.errors);
        }

        Ok(combined)
    }
}
