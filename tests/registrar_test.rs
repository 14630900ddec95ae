mod common;

use daemonizer::error::Error;
use daemonizer::registrar::{Registrar, Registration};
use daemonizer::store::memory::MemoryConnector;

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn second_registration_reports_everything_as_existing() {
    let catalog = common::catalog();
    let connector = MemoryConnector::new();
    let registrar = Registrar::new(&catalog, &connector, None);
    let requested = names(&["Fetcher", "Cleaner"]);

    let first = registrar.execute(None, &requested).await.unwrap();
    assert_eq!(
        first,
        Registration {
            newly_registered: names(&["Fetcher", "Cleaner"]),
            already_registered: vec![],
        }
    );

    let second = registrar.execute(None, &requested).await.unwrap();
    assert_eq!(
        second,
        Registration {
            newly_registered: vec![],
            already_registered: names(&["Fetcher", "Cleaner"]),
        }
    );
    assert_eq!(connector.workers().len(), 2);
}

#[tokio::test]
async fn partitions_are_disjoint_and_cover_request() {
    let catalog = common::catalog();
    let connector = MemoryConnector::new();
    connector.seed_worker("a");
    let registrar = Registrar::new(&catalog, &connector, None);

    let registration = registrar
        .execute(None, &names(&["a", "b", "c"]))
        .await
        .unwrap();

    assert_eq!(registration.newly_registered, names(&["b", "c"]));
    assert_eq!(registration.already_registered, names(&["a"]));
    assert_eq!(connector.workers().len(), 3);
}

#[tokio::test]
async fn whole_group_registers_every_worker_type() {
    let catalog = common::catalog();
    let connector = MemoryConnector::new();
    connector.seed_worker("Cleaner");
    let registrar = Registrar::new(&catalog, &connector, None);

    let registration = registrar.execute(Some("feeds"), &[]).await.unwrap();

    assert_eq!(registration.newly_registered, names(&["Fetcher"]));
    assert_eq!(registration.already_registered, names(&["Cleaner"]));
}

#[tokio::test]
async fn installed_groups_are_used_when_none_named() {
    let catalog = common::catalog();
    let connector = MemoryConnector::new();
    let installed = names(&["feeds", "daemons.sample"]);
    let registrar = Registrar::new(&catalog, &connector, Some(&installed));

    let registration = registrar.execute(None, &[]).await.unwrap();

    assert_eq!(
        registration.newly_registered,
        names(&["Cleaner", "Fetcher", "Counter", "Heartbeat"])
    );
}

#[tokio::test]
async fn missing_installed_groups_is_a_configuration_error() {
    let catalog = common::catalog();
    let connector = MemoryConnector::new();
    let registrar = Registrar::new(&catalog, &connector, None);

    let err = registrar.execute(None, &[]).await.unwrap_err();

    assert!(matches!(err, Error::ConfigurationMissing(_)), "got {err:?}");
    assert_eq!(connector.connects(), 0);
}

#[tokio::test]
async fn empty_installed_groups_registers_nothing() {
    let catalog = common::catalog();
    let connector = MemoryConnector::new();
    let installed: Vec<String> = vec![];
    let registrar = Registrar::new(&catalog, &connector, Some(&installed));

    let registration = registrar.execute(None, &[]).await.unwrap();

    assert_eq!(registration, Registration::default());
    assert!(connector.workers().is_empty());
}

#[tokio::test]
async fn unknown_group_aborts_before_any_write() {
    let catalog = common::catalog();
    let connector = MemoryConnector::new();
    let registrar = Registrar::new(&catalog, &connector, None);

    let err = registrar.execute(Some("nowhere"), &[]).await.unwrap_err();

    assert!(matches!(err, Error::GroupNotFound(ref g) if g == "daemons.nowhere"));
    assert!(connector.workers().is_empty());
}

#[tokio::test]
async fn names_outside_the_named_group_are_rejected() {
    let catalog = common::catalog();
    let connector = MemoryConnector::new();
    let registrar = Registrar::new(&catalog, &connector, None);

    let err = registrar
        .execute(Some("feeds"), &names(&["Fetcher", "Heartbeat"]))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::WorkerNotFound { ref worker, .. } if worker == "Heartbeat"));
    assert!(connector.workers().is_empty());
}
