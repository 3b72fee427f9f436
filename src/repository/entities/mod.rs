pub mod click_event;
pub mod link;
