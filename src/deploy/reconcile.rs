//! Deployment status reconciliation of one project matrix.
//!
//! The live workload is the source of truth for "is it running": a
//! non-declarative service found among the running containers is marked
//! deployed (at least 20% progress), one that is not found goes back to 0%.
//! Goal, priority, due date and comment are never written here.

use std::collections::{HashMap, HashSet};

use crate::db::{DbFunctionalService, DbProject, MatrixLine};
use crate::types::{Deployed, Level};

/// The functional service catalog of a pass, indexed by id.
pub struct Catalog {
    services: Vec<DbFunctionalService>,
    by_id: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(services: Vec<DbFunctionalService>) -> Self {
        let by_id = services
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        Self { services, by_id }
    }

    pub fn get(&self, id: &str) -> Option<&DbFunctionalService> {
        self.by_id.get(id).map(|&i| &self.services[i])
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Non-declarative services with a technical service among `live`, in
    /// catalog order.
    pub fn deployed_candidates(&self, live: &HashSet<String>) -> Vec<&DbFunctionalService> {
        self.services
            .iter()
            .filter(|s| !s.declarative_deployment && s.matches_any(live))
            .collect()
    }
}

/// What a reconciliation did to one matrix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Services appended as new deployed lines.
    pub added: Vec<String>,
    /// Existing lines confirmed as deployed.
    pub confirmed: Vec<String>,
    /// Lines that were deployed or in progress and went back to 0.
    pub regressed: Vec<String>,
    pub changed: bool,
    /// The project runs an isolated-environment marker and was left alone.
    pub isolated: bool,
}

/// Reconcile `matrix` in place against the live service names (lower-cased).
pub fn reconcile_matrix(
    matrix: &mut Vec<MatrixLine>,
    live: &HashSet<String>,
    catalog: &Catalog,
) -> ReconcileOutcome {
    let before = matrix.clone();
    let mut outcome = ReconcileOutcome::default();

    // Lines of non-declarative services are "not asserted" until confirmed.
    // Unknown services keep their flag.
    let mut pending: Vec<bool> = matrix
        .iter_mut()
        .map(|line| match catalog.get(&line.service) {
            Some(service) if !service.declarative_deployment => {
                line.deployed = Deployed::No;
                true
            }
            _ => false,
        })
        .collect();

    for service in catalog.deployed_candidates(live) {
        match matrix.iter().position(|l| l.service == service.id) {
            Some(i) => {
                let line = &mut matrix[i];
                line.deployed = Deployed::Yes;
                if line.progress < Level::STARTED {
                    line.progress = Level::STARTED;
                }
                pending[i] = false;
                outcome.confirmed.push(service.id.clone());
            }
            None => {
                matrix.push(MatrixLine {
                    service: service.id.clone(),
                    deployed: Deployed::Yes,
                    progress: Level::STARTED,
                    ..Default::default()
                });
                pending.push(false);
                outcome.added.push(service.id.clone());
            }
        }
    }

    for (i, line) in matrix.iter_mut().enumerate() {
        if !pending[i] {
            continue;
        }
        let old = &before[i];
        if old.deployed == Deployed::Yes || old.progress > Level::NONE {
            outcome.regressed.push(line.service.clone());
        }
        line.progress = Level::NONE;
    }

    outcome.changed = *matrix != before;
    outcome
}

/// Reconcile a project's matrix, leaving projects that run one of the
/// isolated-environment `markers` untouched.
pub fn reconcile_project(
    project: &mut DbProject,
    live: &HashSet<String>,
    catalog: &Catalog,
    markers: &HashSet<String>,
) -> ReconcileOutcome {
    if live.iter().any(|name| markers.contains(name)) {
        return ReconcileOutcome {
            isolated: true,
            ..Default::default()
        };
    }
    reconcile_matrix(&mut project.matrix, live, catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;
    use chrono::TimeZone;

    fn service(id: &str, technical: &[&str], declarative: bool) -> DbFunctionalService {
        DbFunctionalService {
            id: id.to_string(),
            name: id.to_string(),
            package: "Build".to_string(),
            position: 0,
            services: technical.iter().map(|s| s.to_string()).collect(),
            declarative_deployment: declarative,
        }
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![
            service("jenkins", &["jenkins", "jenkins-slave"], false),
            service("sonar", &["SonarQube"], false),
            service("legacy-mainframe-link", &["mainframe"], true),
        ])
    }

    fn live(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_lowercase()).collect()
    }

    fn line(service: &str, deployed: Deployed, progress: u8) -> MatrixLine {
        MatrixLine {
            service: service.to_string(),
            deployed,
            progress: Level::new(progress).unwrap(),
            goal: Level::MAX,
            priority: Priority::P1,
            due_date: Some(chrono::Utc.with_ymd_and_hms(2026, 6, 30, 0, 0, 0).unwrap()),
            comment: "manual note".to_string(),
        }
    }

    fn user_fields(matrix: &[MatrixLine]) -> Vec<(String, Level, Priority, Option<String>, String)> {
        matrix
            .iter()
            .map(|l| {
                (
                    l.service.clone(),
                    l.goal,
                    l.priority,
                    l.due_date.map(|d| d.to_rfc3339()),
                    l.comment.clone(),
                )
            })
            .collect()
    }

    #[test]
    fn test_missing_line_is_appended_as_deployed() {
        let mut matrix = Vec::new();
        let outcome = reconcile_matrix(&mut matrix, &live(&["jenkins"]), &catalog());

        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix[0].service, "jenkins");
        assert_eq!(matrix[0].deployed, Deployed::Yes);
        assert_eq!(matrix[0].progress, Level::STARTED);
        assert_eq!(matrix[0].goal, Level::NONE);
        assert!(matrix[0].comment.is_empty());
        assert_eq!(outcome.added, vec!["jenkins"]);
        assert!(outcome.changed);
    }

    #[test]
    fn test_running_service_keeps_higher_progress() {
        let mut matrix = vec![line("jenkins", Deployed::Yes, 3)];
        let outcome = reconcile_matrix(&mut matrix, &live(&["Jenkins"]), &catalog());

        assert_eq!(matrix[0].deployed, Deployed::Yes);
        assert_eq!(matrix[0].progress.value(), 3);
        assert_eq!(matrix[0].comment, "manual note");
        assert_eq!(outcome.confirmed, vec!["jenkins"]);
        assert!(!outcome.changed);
    }

    #[test]
    fn test_running_service_raises_zero_progress() {
        let mut matrix = vec![line("sonar", Deployed::No, 0)];
        reconcile_matrix(&mut matrix, &live(&["sonarqube"]), &catalog());
        assert_eq!(matrix[0].deployed, Deployed::Yes);
        assert_eq!(matrix[0].progress, Level::STARTED);
    }

    #[test]
    fn test_stopped_service_regresses_to_zero() {
        let mut matrix = vec![line("jenkins", Deployed::Yes, 2)];
        let before = user_fields(&matrix);
        let outcome = reconcile_matrix(&mut matrix, &live(&[]), &catalog());

        assert_eq!(matrix[0].progress, Level::NONE);
        assert_eq!(matrix[0].deployed, Deployed::No);
        assert_eq!(user_fields(&matrix), before);
        assert_eq!(outcome.regressed, vec!["jenkins"]);
    }

    #[test]
    fn test_declarative_line_is_untouched() {
        let mut matrix = vec![line("legacy-mainframe-link", Deployed::Yes, 4)];
        let outcome = reconcile_matrix(&mut matrix, &live(&["nginx"]), &catalog());

        assert_eq!(matrix[0].deployed, Deployed::Yes);
        assert_eq!(matrix[0].progress.value(), 4);
        assert!(!outcome.changed);
    }

    #[test]
    fn test_declarative_service_is_never_a_candidate() {
        let mut matrix = vec![line("legacy-mainframe-link", Deployed::No, 0)];
        let outcome = reconcile_matrix(&mut matrix, &live(&["mainframe"]), &catalog());

        assert_eq!(matrix[0].deployed, Deployed::No);
        assert_eq!(matrix[0].progress, Level::NONE);
        assert!(outcome.added.is_empty());
        assert!(outcome.confirmed.is_empty());
    }

    #[test]
    fn test_line_of_unknown_service_is_untouched() {
        let mut matrix = vec![line("retired", Deployed::Yes, 5)];
        let outcome = reconcile_matrix(&mut matrix, &live(&[]), &catalog());
        assert_eq!(matrix[0].deployed, Deployed::Yes);
        assert_eq!(matrix[0].progress, Level::MAX);
        assert!(!outcome.changed);
    }

    #[test]
    fn test_second_run_is_a_noop() {
        let running = live(&["jenkins-slave", "postgres"]);
        let mut matrix = vec![
            line("sonar", Deployed::Yes, 2),
            line("legacy-mainframe-link", Deployed::Yes, 1),
        ];
        let first = reconcile_matrix(&mut matrix, &running, &catalog());
        assert!(first.changed);
        let once = matrix.clone();

        let second = reconcile_matrix(&mut matrix, &running, &catalog());
        assert_eq!(matrix, once);
        assert!(!second.changed);
        assert!(second.added.is_empty());
        assert!(second.regressed.is_empty());
    }

    #[test]
    fn test_user_fields_survive_every_transition() {
        let cases: [&[&str]; 4] = [&[], &["jenkins"], &["sonarqube", "mainframe"], &["jenkins", "sonarqube"]];
        for running in cases {
            let mut matrix = vec![
                line("jenkins", Deployed::Yes, 3),
                line("sonar", Deployed::No, 0),
                line("legacy-mainframe-link", Deployed::NotApplicable, 0),
                line("retired", Deployed::Yes, 2),
            ];
            let before = user_fields(&matrix);
            reconcile_matrix(&mut matrix, &live(running), &catalog());
            assert_eq!(user_fields(&matrix[..4]), before, "live = {:?}", running);
        }
    }

    #[test]
    fn test_isolated_marker_leaves_project_alone() {
        let mut project = DbProject {
            name: "Atlas".to_string(),
            matrix: vec![line("jenkins", Deployed::Yes, 2)],
            ..Default::default()
        };
        let markers: HashSet<String> = ["isolated-net".to_string()].into_iter().collect();

        let outcome = reconcile_project(&mut project, &live(&["Isolated-Net"]), &catalog(), &markers);
        assert!(outcome.isolated);
        assert!(!outcome.changed);
        assert_eq!(project.matrix[0].progress.value(), 2);

        let outcome = reconcile_project(&mut project, &live(&[]), &catalog(), &markers);
        assert!(!outcome.isolated);
        assert_eq!(project.matrix[0].progress, Level::NONE);
    }
}
