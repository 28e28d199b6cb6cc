use taxtrack_core::Identity;
use taxtrack_store::SeedProvider;

/// Everyone who may log in, built from the seed pages.
///
/// Each entry carries the page it belongs to and that page's subtitle as the
/// unit name.
#[derive(Debug, Clone, Default)]
pub struct PersonnelDirectory {
    entries: Vec<Identity>,
}

impl PersonnelDirectory {
    pub fn from_seed(seed: &dyn SeedProvider) -> Self {
        let mut entries = Vec::new();
        for page_key in seed.page_keys() {
            let Some(page) = seed.seed_page(&page_key) else {
                continue;
            };
            entries.extend(page.personnel.iter().map(|p| Identity {
                id: p.id.clone(),
                rank: p.rank.clone(),
                first_name: p.first_name.clone(),
                last_name: p.last_name.clone(),
                page_key: Some(page_key.clone()),
                unit: Some(page.subtitle.clone()),
            }));
        }
        Self { entries }
    }

    pub fn all(&self) -> &[Identity] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find_by_id(&self, person_id: &str) -> Option<&Identity> {
        self.entries.iter().find(|p| p.id == person_id)
    }

    /// Exact first/last name match; namesakes are all returned.
    pub fn find_by_name(&self, first_name: &str, last_name: &str) -> Vec<&Identity> {
        self.entries
            .iter()
            .filter(|p| p.first_name == first_name && p.last_name == last_name)
            .collect()
    }

    /// Case-insensitive substring match over full name and rank.  An empty
    /// term matches everyone.
    pub fn search(&self, term: &str) -> Vec<&Identity> {
        let term = term.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|p| {
                term.is_empty()
                    || p.full_name().to_lowercase().contains(&term)
                    || p.rank.to_lowercase().contains(&term)
            })
            .collect()
    }
}
