use std::collections::{HashSet, VecDeque};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::gateway::Gateway;

const FOLDER_PAGE_SIZE: usize = 200;

/// Well-known top-level folders, resolvable by a fixed symbolic name without
/// traversal. Display names match exactly (case-sensitive).
const WELL_KNOWN_FOLDERS: &[(&str, &str)] = &[
    ("Inbox", "inbox"),
    ("Drafts", "drafts"),
    ("Sent Items", "sentitems"),
    ("Deleted Items", "deleteditems"),
    ("Junk Email", "junkemail"),
    ("Archive", "archive"),
    ("Outbox", "outbox"),
];

/// A resolved folder. Not persisted; resolved fresh per request.
#[derive(Debug, Clone, Serialize)]
pub struct FolderRef {
    pub display_name: String,
    pub id: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MailFolder {
    id: String,
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "parentFolderId")]
    parent_folder_id: Option<String>,
    #[serde(rename = "childFolderCount")]
    child_folder_count: Option<i32>,
}

impl From<MailFolder> for FolderRef {
    fn from(folder: MailFolder) -> Self {
        Self {
            display_name: folder.display_name,
            id: folder.id,
            parent_id: folder.parent_folder_id,
        }
    }
}

fn well_known_segment(folder_name: &str) -> Option<&'static str> {
    WELL_KNOWN_FOLDERS
        .iter()
        .find(|(display, _)| *display == folder_name)
        .map(|(_, segment)| *segment)
}

/// Resolves human-readable folder names to remote folder identifiers.
///
/// The remote API only exposes parent→child listing, never a
/// resolve-path-to-id primitive, so anything that is not a well-known
/// top-level folder requires walking the hierarchy.
pub struct FolderResolver {
    gateway: Gateway,
}

impl FolderResolver {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    /// Finds the folder whose display name equals `folder_name` exactly.
    ///
    /// Well-known top-level names take a direct lookup first; a provisioned
    /// well-known folder wins, and an unprovisioned one (remote 404) falls
    /// through to the traversal, since a user folder may still carry that
    /// name deeper in the tree. Everything else is a breadth-first traversal
    /// from the top-level collection, following pagination within each
    /// level. Same-depth folders win over deeper ones when names collide. A
    /// visited-id set guarantees termination even on a malformed (cyclic)
    /// hierarchy and ensures no subtree is fetched twice.
    pub async fn resolve(&self, folder_name: &str) -> Result<FolderRef> {
        if let Some(segment) = well_known_segment(folder_name) {
            debug!("resolving '{folder_name}' via well-known folder '{segment}'");
            match self.fetch_well_known(segment).await {
                Ok(folder) => return Ok(folder),
                // Mailbox without this well-known folder provisioned.
                Err(Error::RemoteApi { status: 404, .. }) => {
                    debug!("well-known folder '{segment}' not provisioned, traversing instead");
                }
                Err(other) => return Err(other),
            }
        }

        let mut visited: HashSet<String> = HashSet::new();
        // None marks the top-level collection; Some(id) a folder to descend
        // into. VecDeque keeps the walk breadth-first.
        let mut frontier: VecDeque<Option<String>> = VecDeque::new();
        frontier.push_back(None);

        while let Some(parent) = frontier.pop_front() {
            let mut page_url = Some(self.listing_url(parent.as_deref())?);

            while let Some(url) = page_url {
                let page = self.gateway.get_page::<MailFolder>(&url).await?;
                for folder in page.items {
                    if !visited.insert(folder.id.clone()) {
                        continue;
                    }
                    if folder.display_name == folder_name {
                        info!(
                            "resolved folder '{folder_name}' to id {} after visiting {} folders",
                            folder.id,
                            visited.len()
                        );
                        return Ok(folder.into());
                    }
                    // An absent count is not evidence of a leaf; descend.
                    if folder.child_folder_count.map_or(true, |count| count > 0) {
                        frontier.push_back(Some(folder.id));
                    }
                }
                page_url = page.next_link;
            }
        }

        Err(Error::FolderNotFound {
            name: folder_name.to_string(),
        })
    }

    async fn fetch_well_known(&self, segment: &str) -> Result<FolderRef> {
        let url = self.gateway.api_url(&format!("/me/mailFolders/{segment}"));
        let folder = self.gateway.get_json::<MailFolder>(&url).await?;
        Ok(folder.into())
    }

    fn listing_url(&self, parent_id: Option<&str>) -> Result<String> {
        let endpoint = match parent_id {
            Some(id) => self
                .gateway
                .api_url(&format!("/me/mailFolders/{id}/childFolders")),
            None => self.gateway.api_url("/me/mailFolders"),
        };
        let mut url = Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("invalid folder listing url {endpoint}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("$top", &FOLDER_PAGE_SIZE.to_string());
        Ok(url.to_string())
    }
}
