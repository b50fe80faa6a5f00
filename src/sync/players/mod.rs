mod headless;

pub use headless::HeadlessPlayer;
