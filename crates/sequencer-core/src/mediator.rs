//! The navigation surface the engine exposes to presentation code.
//!
//! A [`NavigationMediator`] holds at most one [`SequenceNavigation`]
//! implementation, registered once. Every call is forwarded to it.
//! [`SequenceWorkspace`] is the headless implementation used by the CLI and
//! by tests.

use crate::container::{Entity, SequenceContainer};
use crate::error::{Result, SequenceError};
use crate::root::SequenceRootContainer;
use crate::types::Target;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationView {
    #[default]
    Simple,
    Advanced,
}

impl NavigationView {
    pub fn as_str(self) -> &'static str {
        match self {
            NavigationView::Simple => "simple",
            NavigationView::Advanced => "advanced",
        }
    }
}

impl fmt::Display for NavigationView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SequenceNavigation
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SequenceNavigation: Send + Sync {
    async fn add_simple_target(&self, target: Target) -> Result<()>;
    async fn add_advanced_target(&self, target: Target) -> Result<()>;
    async fn set_advanced_sequence(&self, root: SequenceRootContainer) -> Result<()>;
    async fn switch_to_advanced_view(&self) -> Result<()>;
    async fn switch_to_simple_view(&self) -> Result<()>;
    /// Copies of every target container in the advanced sequence.
    async fn all_targets_in_advanced_sequence(&self) -> Result<Vec<SequenceContainer>>;
    async fn all_targets_in_simple_sequence(&self) -> Result<Vec<SequenceContainer>>;
}

// ---------------------------------------------------------------------------
// NavigationMediator
// ---------------------------------------------------------------------------

/// Register once, then delegate. The first registration wins; later ones
/// fail with [`SequenceError::AlreadyRegistered`]. Calls made before any
/// registration fail with [`SequenceError::NotInitialized`].
#[derive(Default)]
pub struct NavigationMediator {
    navigation: OnceLock<Arc<dyn SequenceNavigation>>,
}

impl fmt::Debug for NavigationMediator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationMediator")
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl NavigationMediator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, navigation: Arc<dyn SequenceNavigation>) -> Result<()> {
        self.navigation
            .set(navigation)
            .map_err(|_| SequenceError::AlreadyRegistered)?;
        info!("navigation registered");
        Ok(())
    }

    pub fn is_registered(&self) -> bool {
        self.navigation.get().is_some()
    }

    fn navigation(&self) -> Result<&Arc<dyn SequenceNavigation>> {
        self.navigation.get().ok_or(SequenceError::NotInitialized)
    }

    pub async fn add_simple_target(&self, target: Target) -> Result<()> {
        self.navigation()?.add_simple_target(target).await
    }

    pub async fn add_advanced_target(&self, target: Target) -> Result<()> {
        self.navigation()?.add_advanced_target(target).await
    }

    pub async fn set_advanced_sequence(&self, root: SequenceRootContainer) -> Result<()> {
        self.navigation()?.set_advanced_sequence(root).await
    }

    pub async fn switch_to_advanced_view(&self) -> Result<()> {
        self.navigation()?.switch_to_advanced_view().await
    }

    pub async fn switch_to_simple_view(&self) -> Result<()> {
        self.navigation()?.switch_to_simple_view().await
    }

    pub async fn all_targets_in_advanced_sequence(&self) -> Result<Vec<SequenceContainer>> {
        self.navigation()?.all_targets_in_advanced_sequence().await
    }

    pub async fn all_targets_in_simple_sequence(&self) -> Result<Vec<SequenceContainer>> {
        self.navigation()?.all_targets_in_simple_sequence().await
    }
}

// ---------------------------------------------------------------------------
// SequenceWorkspace
// ---------------------------------------------------------------------------

/// A simple target list, an advanced sequence and the current view.
///
/// The advanced root sits behind an async lock. A run holds the write lock
/// for its whole duration, so edits made through the mediator wait until the
/// run ends.
#[derive(Debug)]
pub struct SequenceWorkspace {
    simple: RwLock<Vec<SequenceContainer>>,
    advanced: Arc<RwLock<SequenceRootContainer>>,
    view: RwLock<NavigationView>,
    template: Option<SequenceContainer>,
}

impl Default for SequenceWorkspace {
    fn default() -> Self {
        Self::new(SequenceRootContainer::new("Advanced sequence"))
    }
}

impl SequenceWorkspace {
    pub fn new(advanced: SequenceRootContainer) -> Self {
        SequenceWorkspace {
            simple: RwLock::new(Vec::new()),
            advanced: Arc::new(RwLock::new(advanced)),
            view: RwLock::new(NavigationView::Simple),
            template: None,
        }
    }

    /// New targets are built from copies of `template` instead of empty
    /// target containers.
    pub fn with_template(mut self, template: SequenceContainer) -> Self {
        self.template = Some(template);
        self
    }

    /// The advanced sequence, for running or inspecting it.
    pub fn advanced(&self) -> Arc<RwLock<SequenceRootContainer>> {
        self.advanced.clone()
    }

    pub async fn view(&self) -> NavigationView {
        *self.view.read().await
    }

    fn target_container(&self, target: Target) -> SequenceContainer {
        match &self.template {
            Some(template) => {
                let mut container = template.duplicate();
                container.rename(target.name.clone());
                container.settings_mut().target = Some(target);
                container
            }
            None => SequenceContainer::target(target.name.clone(), target),
        }
    }

    async fn switch(&self, to: NavigationView) {
        let mut view = self.view.write().await;
        if *view != to {
            debug!(from = %*view, %to, "view switched");
            *view = to;
        }
    }
}

#[async_trait]
impl SequenceNavigation for SequenceWorkspace {
    async fn add_simple_target(&self, target: Target) -> Result<()> {
        let container = self.target_container(target);
        debug!(target_name = %container.name(), "simple target added");
        self.simple.write().await.push(container);
        Ok(())
    }

    async fn add_advanced_target(&self, target: Target) -> Result<()> {
        let container = self.target_container(target);
        debug!(target_name = %container.name(), "advanced target added");
        self.advanced.write().await.add(container)?;
        Ok(())
    }

    async fn set_advanced_sequence(&self, root: SequenceRootContainer) -> Result<()> {
        debug!(sequence = %root.name(), "advanced sequence replaced");
        *self.advanced.write().await = root;
        Ok(())
    }

    async fn switch_to_advanced_view(&self) -> Result<()> {
        self.switch(NavigationView::Advanced).await;
        Ok(())
    }

    async fn switch_to_simple_view(&self) -> Result<()> {
        self.switch(NavigationView::Simple).await;
        Ok(())
    }

    async fn all_targets_in_advanced_sequence(&self) -> Result<Vec<SequenceContainer>> {
        let root = self.advanced.read().await;
        Ok(root.targets().into_iter().cloned().collect())
    }

    async fn all_targets_in_simple_sequence(&self) -> Result<Vec<SequenceContainer>> {
        Ok(self.simple.read().await.clone())
    }
}
