//! # Vote Ledger
//!
//! Reads the votes that count towards an identity's reputation.

use crate::model::{Document, IdentityId, VoteRecord, VOTES};
use crate::query::Filter;
use crate::store::{DocumentStore, StoreError};

/// Reader over the votes received by one identity.
pub struct VoteLedger<'a> {
    store: &'a dyn DocumentStore,
    subject: IdentityId,
}

impl<'a> VoteLedger<'a> {
    pub fn new(store: &'a dyn DocumentStore, subject: IdentityId) -> Self {
        Self { store, subject }
    }

    /// Filter selecting reputation-bearing votes for the subject.
    ///
    /// Cancelled votes, legacy votes and self-votes are excluded.
    pub fn filter(&self) -> Filter {
        Filter::new()
            .eq("authorIds", &self.subject)
            .ne("userId", &self.subject)
            .ne("legacy", true)
            .ne("cancelled", true)
    }

    /// Issue a fresh read. Each call starts over; nothing is cached.
    pub fn read(&self) -> Result<Votes, StoreError> {
        let documents = self.store.find(VOTES, &self.filter())?;
        Ok(Votes {
            documents: documents.into_iter(),
        })
    }
}

/// Lazily decoding iterator over ledger votes.
pub struct Votes {
    documents: std::vec::IntoIter<Document>,
}

impl Iterator for Votes {
    type Item = Result<VoteRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.documents
            .next()
            .map(|document| document.decode::<VoteRecord>(VOTES))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.documents.size_hint()
    }
}
