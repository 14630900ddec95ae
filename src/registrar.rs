//! Process registrar: bring the registry in line with the catalog.

use tracing::info;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::store::{Connector, RegistryStore};

/// Outcome of one registration pass. The two lists are disjoint and their
/// union is the requested set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    pub newly_registered: Vec<String>,
    pub already_registered: Vec<String>,
}

impl std::fmt::Display for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<Success>\nFollowing processes added to task list:\n{:?}",
            self.newly_registered
        )?;
        if !self.already_registered.is_empty() {
            write!(
                f,
                "\nAlready Registered Processes found:\n{:?}",
                self.already_registered
            )?;
        }
        Ok(())
    }
}

pub struct Registrar<'a> {
    catalog: &'a Catalog,
    connector: &'a dyn Connector,
    /// Groups installed on this host; `None` when not configured.
    installed_groups: Option<&'a [String]>,
}

impl<'a> Registrar<'a> {
    pub fn new(
        catalog: &'a Catalog,
        connector: &'a dyn Connector,
        installed_groups: Option<&'a [String]>,
    ) -> Self {
        Self {
            catalog,
            connector,
            installed_groups,
        }
    }

    /// Register `workers`, or every worker type of the target groups when
    /// `workers` is empty.
    ///
    /// Target groups are `group` when given, otherwise every installed group.
    /// Explicit names are checked against `group` when one is named.
    pub async fn execute(&self, group: Option<&str>, workers: &[String]) -> Result<Registration> {
        let targets = self.target_names(group, workers)?;

        let mut store = RegistryStore::open(self.connector).await?;
        let (already_registered, newly_registered): (Vec<String>, Vec<String>) = targets
            .into_iter()
            .partition(|name| store.is_registered(name));

        let registered = store.register_workers(&newly_registered).await;
        store.close().await;
        registered?;

        info!(
            new = newly_registered.len(),
            existing = already_registered.len(),
            "registration complete"
        );
        Ok(Registration {
            newly_registered,
            already_registered,
        })
    }

    fn target_names(&self, group: Option<&str>, workers: &[String]) -> Result<Vec<String>> {
        if let Some(group) = group {
            let group = self.catalog.resolve_group(group)?;
            if workers.is_empty() {
                return Ok(group
                    .list_worker_types()
                    .into_iter()
                    .map(str::to_string)
                    .collect());
            }
            for worker in workers {
                group.resolve_worker_type(worker)?;
            }
            return Ok(dedup(workers.iter().cloned()));
        }

        if !workers.is_empty() {
            return Ok(dedup(workers.iter().cloned()));
        }

        let installed = self.installed_groups.ok_or_else(|| {
            Error::ConfigurationMissing(
                "no worker group given and DAEMONIZER_INSTALLED_GROUPS is not set".to_string(),
            )
        })?;
        let mut names = Vec::new();
        for group in installed {
            let group = self.catalog.resolve_group(group)?;
            names.extend(group.list_worker_types().into_iter().map(str::to_string));
        }
        Ok(dedup(names))
    }
}

/// Drop repeated names, keeping first occurrences in order.
fn dedup(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_omits_empty_already_registered() {
        let registration = Registration {
            newly_registered: vec!["Fetcher".into()],
            already_registered: vec![],
        };
        assert_eq!(
            registration.to_string(),
            "<Success>\nFollowing processes added to task list:\n[\"Fetcher\"]"
        );
    }

    #[test]
    fn display_lists_both_partitions() {
        let registration = Registration {
            newly_registered: vec![],
            already_registered: vec!["Fetcher".into(), "Cleaner".into()],
        };
        assert_eq!(
            registration.to_string(),
            "<Success>\nFollowing processes added to task list:\n[]\n\
             Already Registered Processes found:\n[\"Fetcher\", \"Cleaner\"]"
        );
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let names = dedup(["b", "a", "b", "c", "a"].map(String::from));
        assert_eq!(names, vec!["b", "a", "c"]);
    }
}
