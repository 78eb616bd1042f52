//! Matter mirror fields (stored locally as exchanges).

use chrono::NaiveDate;

use super::{ExternalSnapshot, MirrorFields};
use crate::error::MergeError;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatterFields {
    pub display_number: Option<String>,
    pub description: Option<String>,
    pub matter_status: Option<String>,
    pub client_external_id: Option<String>,
    pub practice_area: Option<String>,
    pub open_date: Option<NaiveDate>,
    pub close_date: Option<NaiveDate>,
}

impl MirrorFields for MatterFields {
    fn from_snapshot(snapshot: &ExternalSnapshot) -> Result<Self, MergeError> {
        let open_date = snapshot.date_at("/open_date")?;
        let close_date = snapshot.date_at("/close_date")?;
        if let (Some(open), Some(close)) = (open_date, close_date) {
            if close < open {
                return Err(MergeError::malformed(
                    "close_date",
                    format!("{close} precedes open_date {open}"),
                ));
            }
        }

        Ok(Self {
            display_number: snapshot.string_at("/display_number")?,
            description: snapshot.string_at("/description")?,
            matter_status: snapshot.string_at("/status")?,
            client_external_id: snapshot.string_at("/client/id")?,
            practice_area: snapshot.string_at("/practice_area/name")?,
            open_date,
            close_date,
        })
    }

    fn secondary_key(&self) -> Option<String> {
        self.display_number.clone()
    }
}
