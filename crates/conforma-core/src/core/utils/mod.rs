pub mod logdomain;
