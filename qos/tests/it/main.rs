mod fakes;
mod marker;
mod pipeline;
