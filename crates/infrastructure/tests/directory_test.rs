use domain::{DirectoryError, UserDirectory, UserId, UserProfile};
use infrastructure::InMemoryUserDirectory;
use uuid::Uuid;

#[tokio::test]
async fn test_in_memory_directory_lookup() {
    let directory = InMemoryUserDirectory::new();
    let alice = UserId::from(Uuid::new_v4());
    let profile = UserProfile::new("alice", "Alice", "https://example.com/a.png");
    directory.insert(alice, profile.clone()).await;

    assert_eq!(directory.lookup(alice).await.unwrap(), profile);

    directory.remove(alice).await;
    assert_eq!(
        directory.lookup(alice).await,
        Err(DirectoryError::NotFound(alice))
    );
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let directory = InMemoryUserDirectory::new();
    let stranger = UserId::from(Uuid::new_v4());
    assert_eq!(
        directory.lookup(stranger).await,
        Err(DirectoryError::NotFound(stranger))
    );
}
