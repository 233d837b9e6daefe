//! Employee and department directory.
//!
//! The directory is an external collaborator consumed behind a trait:
//! lookup by id, Active-set enumeration, and departure marking. The
//! department tree is a pure, immutable structure; scope resolution asks
//! it for the effective department set (roots plus subtrees) once per
//! campaign, independent of any rendering layer.

use std::collections::{BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;

use crate::error::EngineError;
use crate::model::{DepartmentId, Employee, EmployeeId, EmploymentStatus};

// ============================================================================
// Department tree
// ============================================================================

/// Immutable parent/child view of the org chart.
#[derive(Debug, Clone, Default)]
pub struct DepartmentTree {
    children: HashMap<DepartmentId, Vec<DepartmentId>>,
    known: BTreeSet<DepartmentId>,
}

impl DepartmentTree {
    /// Builds a tree from `(department, parent)` pairs. A `None` parent
    /// marks a root.
    #[must_use]
    pub fn from_edges(edges: impl IntoIterator<Item = (DepartmentId, Option<DepartmentId>)>) -> Self {
        let mut children: HashMap<DepartmentId, Vec<DepartmentId>> = HashMap::new();
        let mut known = BTreeSet::new();
        for (dept, parent) in edges {
            known.insert(dept.clone());
            if let Some(parent) = parent {
                known.insert(parent.clone());
                children.entry(parent).or_default().push(dept);
            }
        }
        Self { children, known }
    }

    /// Whether the department appears anywhere in the tree.
    #[must_use]
    pub fn contains(&self, id: &DepartmentId) -> bool {
        self.known.contains(id)
    }

    /// Effective department set for the given roots: each root plus its
    /// entire subtree, computed by downward propagation. Unknown roots are
    /// included as-is (flat directories have no edges). A visited set
    /// guards against malformed cyclic input.
    #[must_use]
    pub fn effective_set(&self, roots: &[DepartmentId]) -> BTreeSet<DepartmentId> {
        let mut effective = BTreeSet::new();
        let mut queue: VecDeque<&DepartmentId> = roots.iter().collect();
        while let Some(dept) = queue.pop_front() {
            if !effective.insert(dept.clone()) {
                continue;
            }
            if let Some(children) = self.children.get(dept) {
                queue.extend(children.iter());
            }
        }
        effective
    }
}

// ============================================================================
// Directory trait
// ============================================================================

/// Read-mostly employee directory, consumed as a black box.
#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    /// Looks up one employee.
    async fn get(&self, id: &EmployeeId) -> Result<Option<Employee>, EngineError>;

    /// All currently-Active employees.
    async fn all_active(&self) -> Result<Vec<Employee>, EngineError>;

    /// Active employees whose department is in the effective set of the
    /// given roots (subtree included).
    async fn active_in_departments(
        &self,
        roots: &[DepartmentId],
    ) -> Result<Vec<Employee>, EngineError>;

    /// Flips an employee to Departed with the given termination date and
    /// returns the updated record.
    async fn mark_departed(
        &self,
        id: &EmployeeId,
        termination_date: NaiveDate,
    ) -> Result<Employee, EngineError>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory directory backed by `DashMap`, seeded at startup.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    employees: DashMap<EmployeeId, Employee>,
    tree: DepartmentTree,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new(tree: DepartmentTree) -> Self {
        Self {
            employees: DashMap::new(),
            tree,
        }
    }

    /// Inserts or replaces an employee record.
    pub fn upsert(&self, employee: Employee) {
        self.employees.insert(employee.id.clone(), employee);
    }

    /// Number of employees in the directory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.employees.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }

    #[must_use]
    pub const fn tree(&self) -> &DepartmentTree {
        &self.tree
    }
}

#[async_trait]
impl EmployeeDirectory for InMemoryDirectory {
    async fn get(&self, id: &EmployeeId) -> Result<Option<Employee>, EngineError> {
        Ok(self.employees.get(id).map(|e| e.value().clone()))
    }

    async fn all_active(&self) -> Result<Vec<Employee>, EngineError> {
        let mut active: Vec<Employee> = self
            .employees
            .iter()
            .filter(|e| e.value().is_active())
            .map(|e| e.value().clone())
            .collect();
        // DashMap iteration order is arbitrary; keep scope resolution stable.
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    async fn active_in_departments(
        &self,
        roots: &[DepartmentId],
    ) -> Result<Vec<Employee>, EngineError> {
        let effective = self.tree.effective_set(roots);
        let mut active: Vec<Employee> = self
            .employees
            .iter()
            .filter(|e| e.value().is_active() && effective.contains(&e.value().department_id))
            .map(|e| e.value().clone())
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    async fn mark_departed(
        &self,
        id: &EmployeeId,
        termination_date: NaiveDate,
    ) -> Result<Employee, EngineError> {
        let mut entry = self
            .employees
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("employee", id))?;
        entry.employment_status = EmploymentStatus::Departed;
        entry.termination_date = Some(termination_date);
        Ok(entry.value().clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dept(id: &str) -> DepartmentId {
        DepartmentId::new(id)
    }

    fn employee(id: &str, department: &str, status: EmploymentStatus) -> Employee {
        Employee {
            id: EmployeeId::new(id),
            full_name: format!("Employee {id}"),
            department_id: dept(department),
            employment_status: status,
            email: format!("{id}@example.co.jp"),
            hire_date: NaiveDate::from_ymd_opt(2021, 4, 1).unwrap(),
            termination_date: None,
        }
    }

    fn sample_tree() -> DepartmentTree {
        // D1 -> (D10 -> D100, D20)
        DepartmentTree::from_edges([
            (dept("D1"), None),
            (dept("D10"), Some(dept("D1"))),
            (dept("D20"), Some(dept("D1"))),
            (dept("D100"), Some(dept("D10"))),
        ])
    }

    #[test]
    fn effective_set_includes_subtree() {
        let tree = sample_tree();
        let set = tree.effective_set(&[dept("D10")]);
        assert_eq!(set, BTreeSet::from([dept("D10"), dept("D100")]));
    }

    #[test]
    fn effective_set_from_root_covers_everything() {
        let tree = sample_tree();
        let set = tree.effective_set(&[dept("D1")]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn effective_set_dedupes_overlapping_roots() {
        let tree = sample_tree();
        let set = tree.effective_set(&[dept("D1"), dept("D10")]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn effective_set_with_unknown_root_is_just_the_root() {
        let tree = sample_tree();
        let set = tree.effective_set(&[dept("D999")]);
        assert_eq!(set, BTreeSet::from([dept("D999")]));
    }

    #[test]
    fn effective_set_survives_cyclic_edges() {
        let tree = DepartmentTree::from_edges([
            (dept("A"), Some(dept("B"))),
            (dept("B"), Some(dept("A"))),
        ]);
        let set = tree.effective_set(&[dept("A")]);
        assert_eq!(set, BTreeSet::from([dept("A"), dept("B")]));
    }

    #[tokio::test]
    async fn all_active_filters_departed() {
        let dir = InMemoryDirectory::new(sample_tree());
        dir.upsert(employee("E1", "D10", EmploymentStatus::Active));
        dir.upsert(employee("E2", "D20", EmploymentStatus::Departed));
        dir.upsert(employee("E3", "D100", EmploymentStatus::Active));

        let active = dir.all_active().await.unwrap();
        let ids: Vec<&str> = active.iter().map(|e| e.id.0.as_str()).collect();
        assert_eq!(ids, vec!["E1", "E3"]);
    }

    #[tokio::test]
    async fn active_in_departments_uses_subtree() {
        let dir = InMemoryDirectory::new(sample_tree());
        dir.upsert(employee("E1", "D10", EmploymentStatus::Active));
        dir.upsert(employee("E2", "D100", EmploymentStatus::Active));
        dir.upsert(employee("E3", "D20", EmploymentStatus::Active));
        dir.upsert(employee("E4", "D100", EmploymentStatus::Departed));

        let hits = dir.active_in_departments(&[dept("D10")]).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|e| e.id.0.as_str()).collect();
        assert_eq!(ids, vec!["E1", "E2"]);
    }

    #[tokio::test]
    async fn mark_departed_flips_status() {
        let dir = InMemoryDirectory::new(DepartmentTree::default());
        dir.upsert(employee("E1", "D10", EmploymentStatus::Active));

        let date = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        let updated = dir.mark_departed(&EmployeeId::new("E1"), date).await.unwrap();
        assert_eq!(updated.employment_status, EmploymentStatus::Departed);
        assert_eq!(updated.termination_date, Some(date));

        let err = dir
            .mark_departed(&EmployeeId::new("E404"), date)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
