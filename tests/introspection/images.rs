use crate::common::loader::MockLoader;
use crate::common::macho::MachBuilder;
use crate::common::{fixture, process_with, APP_FRAMEWORKS, APP_PATH, KIT_PATH, SYSTEM_PATH};
use dlscope::{Config, ImageNumber};
use std::sync::Arc;

fn numbers(list: &[dlscope::ImageSymbols]) -> Vec<u32> {
    list.iter().map(|image| image.image_number().0).collect()
}

#[test]
fn all_images_follow_load_order() {
    let fx = fixture();
    let all = fx.process.all_images();
    assert_eq!(fx.process.image_count(), 3);
    assert_eq!(
        all.image_numbers(),
        vec![ImageNumber(0), ImageNumber(1), ImageNumber(2)]
    );
    let paths: Vec<String> = fx.process.image_list().iter().map(|i| i.path()).collect();
    assert_eq!(paths, vec![SYSTEM_PATH, APP_PATH, KIT_PATH]);
    assert_eq!(all.image_number(), ImageNumber::ANY);
    assert_eq!(all.header(), 0);
}

#[test]
fn all_images_see_later_loads() {
    let fx = fixture();
    let all = fx.process.all_images();
    assert_eq!(all.image_numbers().len(), 3);
    let late = MachBuilder::new().export("late_fn").build();
    fx.loader.add_image("/usr/lib/liblate.dylib", &late);
    assert_eq!(all.image_numbers().len(), 4);
    assert!(all.lookup("late_fn").is_some());
}

#[test]
fn app_images_are_main_and_bundled_frameworks() {
    let fx = fixture();
    assert_eq!(numbers(&fx.process.app_images().image_list()), vec![1, 2]);
}

#[test]
fn app_images_match_development_markers() {
    let fx = fixture();
    let lib = MachBuilder::new().export("util").build();
    let (util, _) = fx.loader.add_image(
        "/Users/dev/Library/Developer/Xcode/DerivedData/Demo/Build/Products/Debug/Util.framework/Util",
        &lib,
    );
    let (tests, _) = fx
        .loader
        .add_image("/tmp/build/DemoTests.xctest/DemoTests", &lib);
    let (plain, _) = fx
        .loader
        .add_image("/Users/dev/Library/Developer/Xcode/DerivedData/libplain.dylib", &lib);

    let app = fx.process.app_images().image_numbers();
    assert!(app.contains(&ImageNumber(util)));
    assert!(app.contains(&ImageNumber(tests)));
    assert!(!app.contains(&ImageNumber(plain)));
    assert!(!app.contains(&ImageNumber(0)));
}

#[test]
fn configured_frameworks_directory_wins() {
    let lib = MachBuilder::new().export("helper").build();
    let loader = MockLoader::new().with_frameworks(APP_FRAMEWORKS);
    loader.add_image("/opt/vendor/Frameworks/Helper.framework/Helper", &lib);
    loader.add_image(KIT_PATH, &lib);
    let loader = Arc::new(loader);

    let mut config = Config::default();
    config.images.private_frameworks = Some("/opt/vendor/Frameworks".to_string());
    let process = Arc::new(dlscope::Process::new(loader).with_config(config));
    assert_eq!(
        process.app_images().image_numbers(),
        vec![ImageNumber(0)]
    );
}

#[test]
fn main_image_is_the_executable() {
    let fx = fixture();
    let main = fx.process.main_image();
    assert_eq!(main.image_number(), ImageNumber(1));
    assert_eq!(main.path(), APP_PATH);
    assert_eq!(main.key(), "Demo");
    assert_eq!(main.header(), fx.headers[1]);
    assert_eq!(main.slide(), fx.headers[1] as isize);
}

#[test]
#[should_panic(expected = "main executable")]
fn main_image_requires_a_loaded_executable() {
    let (process, loader) = process_with(MockLoader::new());
    loader.add_image(SYSTEM_PATH, &MachBuilder::new().build());
    loader.set_main("/Applications/Gone.app/Contents/MacOS/Gone");
    let _ = process.main_image();
}

#[test]
#[should_panic(expected = "out of range")]
fn image_index_must_be_loaded() {
    let fx = fixture();
    let _ = fx.process.image(3);
}

#[test]
fn last_image_is_most_recent() {
    let fx = fixture();
    let last = fx.process.last_image().expect("images are loaded");
    assert_eq!(last.path(), KIT_PATH);

    let (empty, _) = process_with(MockLoader::new());
    assert!(empty.last_image().is_none());
}

#[test]
fn image_map_keys_by_last_component() {
    let fx = fixture();
    let map = fx.process.image_map();
    let keys: Vec<&str> = map.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["Demo", "Kit", "libsystem_demo.dylib"]);
    assert_eq!(map["Demo"].image_number(), ImageNumber(1));
    assert_eq!(map["Kit"].path(), KIT_PATH);
}

#[test]
fn image_map_keeps_first_duplicate() {
    let fx = fixture();
    fx.loader
        .add_image("/Library/Frameworks/Kit.framework/Kit", &MachBuilder::new().build());
    let map = fx.process.image_map();
    assert_eq!(map.len(), 3);
    assert_eq!(map["Kit"].image_number(), ImageNumber(2));
}

#[test]
fn image_containing_an_address() {
    let fx = fixture();
    let found = fx
        .process
        .image_containing(fx.headers[2] + 0x10)
        .expect("inside the framework's text");
    assert_eq!(found.image_number(), ImageNumber(2));
    assert!(fx.process.image_containing(0x10).is_none());
}

#[test]
fn sets_display_number_path_and_header() {
    let fx = fixture();
    assert_eq!(fx.process.all_images().to_string(), "#* <all images> 0x0");
    assert_eq!(
        fx.process.main_image().to_string(),
        format!("#1 {} {:#x}", APP_PATH, fx.headers[1])
    );
}

#[test]
fn sets_compare_by_number() {
    let fx = fixture();
    assert_eq!(fx.process.main_image(), fx.process.image(1));
    assert_ne!(fx.process.image(0), fx.process.image(2));
}
