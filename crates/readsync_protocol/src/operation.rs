//! Named remote operations.

/// Fields selected for every read session.
macro_rules! read_fields {
    () => {
        "id progress_pages started_at finished_at edition_id updated_at"
    };
}

/// An operation understood by the remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Identify the owner of the credential.
    Me,
    /// Full-text catalog search.
    SearchCatalog,
    /// Fetch catalog metadata for a batch of book ids.
    BooksByIds,
    /// Fetch a library entry with its unfinished read sessions.
    UserBook,
    /// Look up the caller's library entry for a catalog book.
    FindLibraryEntry,
    /// Start a read session.
    InsertReadSession,
    /// Update a read session.
    UpdateReadSession,
    /// Add a catalog book to the caller's library.
    InsertUserBook,
    /// Change the reading status of a library entry.
    UpdateUserBook,
    /// Delete a read session.
    DeleteReadSession,
    /// List every read session of a library entry, finished or not.
    ListReadSessions,
}

impl Operation {
    /// Returns the operation name.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Me => "Me",
            Operation::SearchCatalog => "SearchCatalog",
            Operation::BooksByIds => "BooksByIds",
            Operation::UserBook => "UserBook",
            Operation::FindLibraryEntry => "FindLibraryEntry",
            Operation::InsertReadSession => "InsertReadSession",
            Operation::UpdateReadSession => "UpdateReadSession",
            Operation::InsertUserBook => "InsertUserBook",
            Operation::UpdateUserBook => "UpdateUserBook",
            Operation::DeleteReadSession => "DeleteReadSession",
            Operation::ListReadSessions => "ListReadSessions",
        }
    }

    /// Looks an operation up by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.name() == name)
    }

    /// Every operation.
    pub const ALL: [Operation; 11] = [
        Operation::Me,
        Operation::SearchCatalog,
        Operation::BooksByIds,
        Operation::UserBook,
        Operation::FindLibraryEntry,
        Operation::InsertReadSession,
        Operation::UpdateReadSession,
        Operation::InsertUserBook,
        Operation::UpdateUserBook,
        Operation::DeleteReadSession,
        Operation::ListReadSessions,
    ];

    /// Returns true if the operation changes remote state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Operation::InsertReadSession
                | Operation::UpdateReadSession
                | Operation::InsertUserBook
                | Operation::UpdateUserBook
                | Operation::DeleteReadSession
        )
    }

    /// Returns the GraphQL document.
    pub fn document(&self) -> &'static str {
        match self {
            Operation::Me => "query Me { me { id username } }",
            Operation::SearchCatalog => {
                "query SearchCatalog($query: String!, $perPage: Int!) { \
                 search(query: $query, query_type: \"Book\", per_page: $perPage) { ids } }"
            }
            Operation::BooksByIds => {
                "query BooksByIds($ids: [Int!]!) { books(where: {id: {_in: $ids}}) { \
                 id title pages contributions { author { name } } \
                 editions { id isbn_10 isbn_13 pages } } }"
            }
            Operation::UserBook => concat!(
                "query UserBook($id: Int!) { user_books_by_pk(id: $id) { ",
                "id book_id status_id edition { id pages } book { pages } ",
                "user_book_reads(where: {finished_at: {_is_null: true}}, order_by: {id: desc}) { ",
                read_fields!(),
                " } } }"
            ),
            Operation::FindLibraryEntry => {
                "query FindLibraryEntry($bookId: Int!) { me { \
                 user_books(where: {book_id: {_eq: $bookId}}) { id book_id status_id } } }"
            }
            Operation::InsertReadSession => concat!(
                "mutation InsertReadSession($userBookId: Int!, $read: DatesReadInput!) { ",
                "insert_user_book_read(user_book_id: $userBookId, user_book_read: $read) { ",
                "error user_book_read { ",
                read_fields!(),
                " } } }"
            ),
            Operation::UpdateReadSession => concat!(
                "mutation UpdateReadSession($id: Int!, $read: DatesReadInput!) { ",
                "update_user_book_read(id: $id, object: $read) { ",
                "error user_book_read { ",
                read_fields!(),
                " } } }"
            ),
            Operation::InsertUserBook => {
                "mutation InsertUserBook($object: UserBookCreateInput!) { \
                 insert_user_book(object: $object) { error id } }"
            }
            Operation::UpdateUserBook => {
                "mutation UpdateUserBook($id: Int!, $object: UserBookUpdateInput!) { \
                 update_user_book(id: $id, object: $object) { error id } }"
            }
            Operation::DeleteReadSession => {
                "mutation DeleteReadSession($id: Int!) { delete_user_book_read(id: $id) { id } }"
            }
            Operation::ListReadSessions => concat!(
                "query ListReadSessions($userBookId: Int!) { ",
                "user_book_reads(where: {user_book_id: {_eq: $userBookId}}, order_by: {id: asc}) { ",
                read_fields!(),
                " } }"
            ),
        }
    }
}

/// Reading status of a library entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingStatus {
    /// On the wish list.
    WantToRead,
    /// Currently being read.
    CurrentlyReading,
    /// Finished.
    Read,
}

impl ReadingStatus {
    /// Converts to the remote status id.
    pub fn to_id(&self) -> i64 {
        match self {
            ReadingStatus::WantToRead => 1,
            ReadingStatus::CurrentlyReading => 2,
            ReadingStatus::Read => 3,
        }
    }

    /// Converts from the remote status id.
    pub fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(ReadingStatus::WantToRead),
            2 => Some(ReadingStatus::CurrentlyReading),
            3 => Some(ReadingStatus::Read),
            _ => None,
        }
    }
}

/// Privacy of a library entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrivacySetting {
    /// Visible to everyone.
    #[default]
    Public,
    /// Visible to followers.
    FollowersOnly,
    /// Visible to the owner only.
    Private,
}

impl PrivacySetting {
    /// Converts to the remote privacy setting id.
    pub fn to_id(&self) -> i64 {
        match self {
            PrivacySetting::Public => 1,
            PrivacySetting::FollowersOnly => 2,
            PrivacySetting::Private => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_declare_their_own_name() {
        for op in Operation::ALL {
            let doc = op.document();
            let keyword = if op.is_mutation() { "mutation" } else { "query" };
            assert!(
                doc.starts_with(&format!("{} {}", keyword, op.name())),
                "{} does not declare itself",
                op.name()
            );
        }
    }

    #[test]
    fn lookup_by_name() {
        assert_eq!(
            Operation::from_name("UpdateReadSession"),
            Some(Operation::UpdateReadSession)
        );
        assert_eq!(Operation::from_name("DropTables"), None);
    }

    #[test]
    fn status_ids() {
        assert_eq!(ReadingStatus::CurrentlyReading.to_id(), 2);
        assert_eq!(ReadingStatus::from_id(3), Some(ReadingStatus::Read));
        assert_eq!(ReadingStatus::from_id(9), None);
    }
}
