//! End-to-end scenarios exercising the Mall across all three stores.

use container_storage::{Mall, MallOptions};
use tempfile::TempDir;

fn new_mall() -> (TempDir, Mall) {
    let dir = TempDir::new().unwrap();
    let mall = Mall::new(MallOptions::new(dir.path().to_path_buf())).unwrap();
    (dir, mall)
}

#[test]
fn test_full_lifecycle_layer_image_container() {
    let (_dir, mut mall) = new_mall();

    let base = mall
        .create_layer(None, None, vec!["base".to_string()], false, String::new())
        .unwrap();
    let image = mall
        .create_image(None, "base", vec!["app:latest".to_string()])
        .unwrap();
    let container = mall
        .create_container(None, "app:latest", vec!["c1".to_string()], String::new())
        .unwrap();

    assert_eq!(container.image_id, image.id);
    assert_ne!(container.layer_id, base.id);
    assert!(mall.layers().exists(&container.layer_id));

    mall.delete_container("c1").unwrap();
    assert!(!mall.layers().exists(&container.layer_id));

    mall.delete_image("app:latest").unwrap();
    assert!(!mall.images().exists("app:latest"));

    mall.delete_layer("base").unwrap();
    assert!(mall.layers().layers().is_empty());
}

#[test]
fn test_cannot_delete_layer_backing_an_image() {
    let (_dir, mut mall) = new_mall();
    let base = mall
        .create_layer(None, None, vec![], false, String::new())
        .unwrap();
    mall.create_image(None, &base.id, vec![]).unwrap();

    assert!(mall.delete_layer(&base.id).is_err());
}

#[test]
fn test_cannot_delete_image_backing_a_container() {
    let (_dir, mut mall) = new_mall();
    let base = mall
        .create_layer(None, None, vec![], false, String::new())
        .unwrap();
    let image = mall.create_image(None, &base.id, vec![]).unwrap();
    mall.create_container(None, &image.id, vec![], String::new())
        .unwrap();

    assert!(mall.delete_image(&image.id).is_err());
}

#[test]
fn test_layered_diff_reflects_written_content() {
    let (_dir, mut mall) = new_mall();
    let base = mall
        .create_layer(None, None, vec![], false, String::new())
        .unwrap();
    let image = mall.create_image(None, &base.id, vec![]).unwrap();
    let container = mall
        .create_container(None, &image.id, vec![], String::new())
        .unwrap();

    let size_before = mall.diff_size(&container.layer_id).unwrap();
    assert_eq!(size_before, 0);

    let mount_path = mall.mount(&container.layer_id).unwrap();
    std::fs::write(mount_path.join("a"), b"hello world").unwrap();
    mall.unmount(&container.layer_id).unwrap();

    let size_after = mall.diff_size(&container.layer_id).unwrap();
    assert_eq!(size_after, 11);

    let changes = mall.changes(&container.layer_id).unwrap();
    assert_eq!(changes.len(), 1);
}

#[test]
fn test_duplicate_names_rejected_across_creates() {
    let (_dir, mut mall) = new_mall();
    mall.create_layer(None, None, vec!["shared".to_string()], false, String::new())
        .unwrap();
    let err = mall
        .create_layer(None, None, vec!["shared".to_string()], false, String::new())
        .unwrap_err();
    assert!(format!("{}", err).contains("shared"));
}

#[test]
fn test_store_reopens_after_process_restart_simulation() {
    let dir = TempDir::new().unwrap();
    let top_layer;
    {
        let mut mall = Mall::new(MallOptions::new(dir.path().to_path_buf())).unwrap();
        let base = mall
            .create_layer(None, None, vec!["persisted".to_string()], false, String::new())
            .unwrap();
        top_layer = base.id;
    }
    let mall = Mall::new(MallOptions::new(dir.path().to_path_buf())).unwrap();
    assert!(mall.layers().exists(&top_layer));
    assert!(mall.layers().exists("persisted"));
}
