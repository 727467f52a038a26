extern crate mmtk_cms;

use mmtk_cms::CMSBuilder;

#[test]
fn set_options_by_name() {
    let mut builder = CMSBuilder::new_no_env_vars();
    assert!(builder.set_option("coalesce_policy", "4"));
    assert_eq!(builder.options.coalesce_policy, 4);

    // Out of range.
    assert!(!builder.set_option("coalesce_policy", "5"));
    assert_eq!(builder.options.coalesce_policy, 4);

    assert!(!builder.set_option("no_such_option", "1"));
}

#[test]
fn set_options_in_bulk() {
    let mut builder = CMSBuilder::new_no_env_vars();
    assert!(builder.set_options_bulk_by_str(
        "initiating_occupancy_fraction=60 use_initiating_occupancy_only=true precleaning_enabled=false"
    ));
    assert_eq!(builder.options.initiating_occupancy_fraction, 60);
    assert!(builder.options.use_initiating_occupancy_only);
    assert!(!builder.options.precleaning_enabled);
    assert!((builder.options.initiating_occupancy() - 0.6).abs() < 1e-9);
}
