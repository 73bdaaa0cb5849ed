mod auction;
mod helpers;
mod service;
