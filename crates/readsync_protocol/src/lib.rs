//! # readsync Protocol
//!
//! Wire protocol types for the remote reading-tracker API.
//!
//! This crate provides:
//! - The GraphQL request/response envelope
//! - Named operation documents and their variables
//! - Typed response payloads
//! - Classification of errors embedded in responses
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;
mod messages;
mod operation;

pub use envelope::{ErrorExtensions, GraphqlError, GraphqlRequest, GraphqlResponse};
pub use error::{EmbeddedError, ProtocolError, ProtocolResult, RemoteErrorCode};
pub use messages::{
    Author, BookPages, BooksData, CatalogBook, CatalogEdition, Contribution, DeleteReadData,
    DeletedRead, IdRecord, LibraryEntry, LibraryLookupData, LibraryOwner, MeData,
    MutationResult, Payload, ReadInput, ReadMutationData, ReadRecord, ReadSession,
    ReadSessionsData, RemoteUser, SearchData, SearchResults, UserBook, UserBookData,
    UserBookEdition, UserBookInput, UserBookMutationData,
};
pub use operation::{Operation, PrivacySetting, ReadingStatus};
