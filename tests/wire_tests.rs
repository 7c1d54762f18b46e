use fab_exchange::algs::communicator::CommTag;
use fab_exchange::algs::copy_tag::CopyComTag;
use fab_exchange::algs::wire::{block_offsets, copy_message_into, expect_exact_len, message_bytes};
use fab_exchange::data::Fab;
use fab_exchange::geometry::IndexBox;

#[test]
fn commtag_offset_wrap() {
    let t = CommTag::new(u16::MAX).offset(1);
    assert_eq!(t.as_u16(), 0);
}

#[test]
fn expect_exact_len_err() {
    assert!(expect_exact_len(3, 4).is_err());
    assert!(expect_exact_len(4, 4).is_ok());
}

#[test]
fn blocks_are_component_planes_x_fastest() {
    let bx = IndexBox::from_bounds([0, 0, 0], [2, 1, 0]);
    let mut fab = Fab::<i32>::new(bx, 2);
    for p in bx.cells() {
        fab.set(p, 0, p[0] + 10 * p[1]).unwrap();
        fab.set(p, 1, -(p[0] + 10 * p[1])).unwrap();
    }
    let region = IndexBox::from_bounds([1, 0, 0], [2, 1, 0]);
    let mut out = vec![0i32; 8];
    fab.pack_region(&region, 0, 2, &mut out).unwrap();
    assert_eq!(out, vec![1, 2, 11, 12, -1, -2, -11, -12]);
}

#[test]
fn message_layout_and_checked_copy() {
    let tags = vec![
        CopyComTag::new(IndexBox::line(0, 3), IndexBox::line(10, 13), 0, 1),
        CopyComTag::new(IndexBox::line(8, 8), IndexBox::line(20, 20), 0, 2),
    ];
    assert_eq!(block_offsets(&tags, 3), vec![0, 12]);
    assert_eq!(message_bytes::<f32>(&tags, 3), 60);

    let sent: Vec<f32> = (0..15).map(|i| i as f32).collect();
    let raw = bytemuck::cast_slice::<f32, u8>(&sent).to_vec();
    let mut got = vec![0.0f32; 15];
    copy_message_into(1, &raw, &mut got).unwrap();
    assert_eq!(got, sent);
    assert!(copy_message_into(1, &raw[..56], &mut got).is_err());
}
